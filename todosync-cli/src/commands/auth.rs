//! `todosync auth`: one-time OAuth consent.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use clap::Args;

use todosync_drive::Credentials;

#[derive(Args, Debug)]
pub struct AuthArgs {
    /// Authorization code; read from stdin when omitted.
    #[arg(long)]
    pub code: Option<String>,
}

impl AuthArgs {
    pub fn run(self) -> Result<()> {
        let (home, settings) = super::load_settings()?;
        let credentials_path = settings.credentials_path_at(&home);
        let credentials = Credentials::load(&credentials_path).with_context(|| {
            format!(
                "failed to read OAuth client secret at {}",
                credentials_path.display()
            )
        })?;

        println!("Open this URL in a browser and grant access:\n");
        println!("  {}\n", credentials.authorize_url(&settings.scope));

        let code = match self.code {
            Some(code) => code,
            None => prompt_code()?,
        };
        if code.trim().is_empty() {
            bail!("no authorization code given");
        }

        let token = credentials
            .exchange_code(&code)
            .context("failed to exchange the authorization code")?;
        let token_path = settings.token_path_at(&home);
        token
            .save(&token_path)
            .with_context(|| format!("failed to save token to {}", token_path.display()))?;

        println!("✓ Token saved to {}", token_path.display());
        Ok(())
    }
}

fn prompt_code() -> Result<String> {
    print!("Authorization code: ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read authorization code")?;
    Ok(line.trim().to_string())
}
