//! Authentication commands.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use auth_flow::{AuthError, AuthManager};
use std::io::{self, Write};

const MAX_ATTEMPTS: usize = 3;

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

/// Progressive login: email → password → OTP.
pub async fn login(manager: &AuthManager, legacy: bool, format: &OutputFormat) -> Result<()> {
    if manager.check_auth().await? {
        let email = manager
            .current()?
            .identity
            .map(|i| i.email)
            .unwrap_or_else(|| "unknown".to_string());
        output::print_success(&format!("Already logged in as {}", email), format);
        return Ok(());
    }

    if legacy {
        return legacy_login(manager, format).await;
    }

    let email = prompt("Email")?;
    if email.is_empty() {
        output::print_error("Email is required", format);
        return Ok(());
    }

    match manager.validate_email(&email).await {
        Ok(step) if step.is_new_user => {
            println!("No account for {} yet; a new one will be created.", email)
        }
        Ok(_) => {}
        Err(e) => {
            output::print_error(&format!("Email validation failed: {}", e), format);
            return Ok(());
        }
    }

    // Wrong password keeps the handshake in the password step, so the
    // user retries without re-entering the email.
    let mut attempts = 0;
    loop {
        let password = rpassword::prompt_password("Password: ")?;
        match manager.validate_password(&password).await {
            Ok(_) => break,
            Err(AuthError::InvalidCredentials(message)) if attempts + 1 < MAX_ATTEMPTS => {
                attempts += 1;
                output::print_error(&message, format);
            }
            Err(e) => {
                output::print_error(&format!("Password validation failed: {}", e), format);
                manager.reset_step();
                return Ok(());
            }
        }
    }

    println!("A one-time code has been sent to {}", email);

    let mut attempts = 0;
    loop {
        let code = prompt("Code")?;
        match manager.login_with_otp(&code, None).await {
            Ok(outcome) => {
                output::print_success(
                    &format!("Logged in as {}", outcome.identity.email),
                    format,
                );
                return Ok(());
            }
            Err(AuthError::InvalidCredentials(message) | AuthError::Validation(message))
                if attempts + 1 < MAX_ATTEMPTS =>
            {
                attempts += 1;
                output::print_error(&message, format);
            }
            Err(e) => {
                output::print_error(&format!("Login failed: {}", e), format);
                manager.reset_step();
                return Ok(());
            }
        }
    }
}

/// Single round-trip fallback for accounts without progressive auth.
async fn legacy_login(manager: &AuthManager, format: &OutputFormat) -> Result<()> {
    let email = prompt("Email")?;
    let password = rpassword::prompt_password("Password: ")?;

    match manager.legacy_login(&email, &password).await {
        Ok(outcome) => {
            output::print_success(&format!("Logged in as {}", outcome.identity.email), format)
        }
        Err(e) => output::print_error(&format!("Login failed: {}", e), format),
    }
    Ok(())
}

/// Create an account (implies login).
pub async fn register(manager: &AuthManager, format: &OutputFormat) -> Result<()> {
    let name = prompt("Name")?;
    let email = prompt("Email")?;
    let password = rpassword::prompt_password("Password: ")?;
    let confirmation = rpassword::prompt_password("Confirm password: ")?;

    match manager.register(&name, &email, &password, &confirmation).await {
        Ok(outcome) => output::print_success(
            &format!("Account created, logged in as {}", outcome.identity.email),
            format,
        ),
        Err(e) => output::print_error(&format!("Registration failed: {}", e), format),
    }
    Ok(())
}

/// Logout and clear the local session.
pub async fn logout(manager: &AuthManager, format: &OutputFormat) -> Result<()> {
    manager.logout().await?;
    output::print_success("Logged out", format);
    Ok(())
}

/// Check authentication status.
pub async fn status(manager: &AuthManager, format: &OutputFormat) -> Result<()> {
    let authenticated = manager.check_auth().await?;
    let snapshot = manager.current()?;

    match format {
        OutputFormat::Text => {
            output::print_row(
                "Auth",
                if authenticated {
                    "logged in"
                } else {
                    "logged out"
                },
            );
            if let Some(identity) = &snapshot.identity {
                output::print_row("Email", &identity.email);
                output::print_row("Name", &identity.name);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "logged_in": authenticated,
                    "email": snapshot.identity.as_ref().map(|i| i.email.clone()),
                })
            );
        }
    }
    Ok(())
}

/// Show the logged-in identity.
pub async fn whoami(manager: &AuthManager, format: &OutputFormat) -> Result<()> {
    let snapshot = manager.current()?;
    match snapshot.identity {
        Some(identity) if snapshot.is_authenticated => match format {
            OutputFormat::Text => {
                output::print_row("Id", &identity.id.to_string());
                output::print_row("Name", &identity.name);
                output::print_row("Email", &identity.email);
                output::print_row("Role", &identity.role);
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            }
        },
        _ => output::print_error("Not logged in", format),
    }
    Ok(())
}

/// Force a token refresh.
pub async fn refresh(manager: &AuthManager, format: &OutputFormat) -> Result<()> {
    match manager.refresh().await {
        Ok(()) => output::print_success("Session refreshed", format),
        Err(e) => output::print_error(&format!("Refresh failed: {}", e), format),
    }
    Ok(())
}
