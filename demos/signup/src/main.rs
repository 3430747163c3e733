//! # Signup Example
//!
//! A user signup producer with three consumers, run three ways:
//! with no unit of work, inside one that commits, and inside one that
//! rolls back. Ends by printing the registered side-effects.
//!
//! ```text
//! RUST_LOG=side_effects_core=debug cargo run -p signup-example
//! ```

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use side_effects_core::checks::check_function_signatures;
use side_effects_core::display::{Filter, Format, Listing};
use side_effects_core::{
    consumer, has_side_effects, Arguments, Call, CommitHooks, Immediate, Registry, Settings,
    Signature, UnitOfWork,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USER_SIGNUP: &str = "user:signup";

// ============================================================================
// Domain
// ============================================================================

#[derive(Debug, Clone)]
struct User {
    id: u64,
    email: String,
}

#[derive(Default)]
struct Users {
    rows: Mutex<Vec<User>>,
}

impl Users {
    fn create(&self, email: &str) -> Result<User> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows.iter().any(|u| u.email == email) {
            anyhow::bail!("{email} is already registered");
        }
        let user = User {
            id: rows.len() as u64 + 1,
            email: email.to_string(),
        };
        rows.push(user.clone());
        Ok(user)
    }
}

// ============================================================================
// Consumers
// ============================================================================

fn send_welcome_email(call: &Call) -> anyhow::Result<()> {
    let email = call.get::<String>("email")?;
    let user_id = call.return_value::<User>().map(|u| u.id);
    info!(%email, ?user_id, "sending welcome email");
    Ok(())
}

fn audit_signup(call: &Call) -> anyhow::Result<()> {
    let email = call.get::<String>("email")?;
    if let Some(meta) = call.meta() {
        info!(%email, label = meta.label(), dispatch_id = %meta.dispatch_id(), "audit");
    }
    Ok(())
}

fn notify_sales(call: &Call) -> anyhow::Result<()> {
    info!(email = %call.get::<String>("email")?, "new lead");
    Ok(())
}

fn register_consumers(registry: &Registry) -> Result<()> {
    registry.register(
        USER_SIGNUP,
        consumer!(
            send_welcome_email,
            Signature::new().arg("email").arg("return_value"),
            "Send the welcome email.\n\nUses the user id from the signup result."
        ),
    )?;
    registry.register(
        USER_SIGNUP,
        consumer!(
            audit_signup,
            Signature::new().arg("email").with_meta(),
            "Write an audit line for the signup."
        ),
    )?;
    registry.register(
        USER_SIGNUP,
        consumer!(notify_sales, Signature::new().arg("email")),
    )?;
    Ok(())
}

// ============================================================================
// Producer
// ============================================================================

fn signup(registry: &Arc<Registry>, hooks: &dyn CommitHooks, users: &Users, email: &str) -> Result<User> {
    has_side_effects(USER_SIGNUP).call(
        registry,
        hooks,
        Arguments::new().arg(email.to_string()),
        || users.create(email),
    )
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("signup_example=info".parse()?))
        .init();

    let settings = Settings::from_env();
    let registry = Arc::new(Registry::with_settings(settings));
    register_consumers(&registry)?;

    for finding in check_function_signatures(&registry) {
        warn!(id = finding.id, "{}", finding.msg);
    }

    let users = Users::default();

    info!("signup with no unit of work");
    signup(&registry, &Immediate, &users, "ada@example.com")?;

    info!("signup inside a committed unit of work");
    let uow = UnitOfWork::new();
    uow.atomic(|| -> Result<()> {
        signup(&registry, &uow, &users, "grace@example.com")?;
        info!(pending = ?uow.pending(), "committing");
        Ok(())
    })?;

    info!("signup inside a rolled back unit of work");
    let outcome = uow.atomic(|| -> Result<()> {
        signup(&registry, &uow, &users, "linus@example.com")?;
        anyhow::bail!("payment declined")
    });
    if let Err(e) = outcome {
        info!(error = %e, "rolled back; no side-effects ran");
    }

    info!("duplicate signup fails before dispatch");
    if let Err(e) = signup(&registry, &Immediate, &users, "ada@example.com") {
        info!(error = %e, "producer failed; no side-effects ran");
    }

    let listing = Listing::new(&registry, &Filter::All);
    listing.render(Format::Summary, &mut io::stdout(), &mut io::stderr())?;

    let code = listing.exit_code(settings.strict_mode);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
