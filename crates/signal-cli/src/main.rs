//! signal-cli entry point: account registration and verification.

mod commands;
mod config;

use clap::{ArgAction, Parser, Subcommand};
use signal_manager::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "signal-cli", about = "Signal command line client", long_about = None)]
struct Cli {
    /// Phone number of the local account, in E.164 format
    #[arg(short = 'a', long = "account")]
    account: String,

    /// Raise the log level; repeat for more detail
    #[arg(long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account, or reactivate a previously registered one
    Register {
        /// Request the verification code via voice call instead of SMS
        #[arg(short, long)]
        voice: bool,

        /// Captcha token, with or without the signalcaptcha:// prefix
        #[arg(long)]
        captcha: Option<String>,
    },
    /// Submit the verification code to finish registration
    Verify {
        /// The verification code received via SMS or voice call
        code: String,

        /// Registration lock pin, if the account has one
        #[arg(short, long)]
        pin: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let status = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            status_for(&e)
        }
    };
    std::process::exit(status);
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = Config::load()
        .map_err(|e| Error::UserError(format!("Failed to load configuration: {e:#}")))?;

    match cli.command {
        Commands::Register { voice, captcha } => {
            commands::register(&config, &cli.account, voice, captcha.as_deref()).await
        }
        Commands::Verify { code, pin } => {
            commands::verify(&config, &cli.account, &code, pin.as_deref()).await
        }
    }
}

fn status_for(error: &Error) -> i32 {
    match error {
        Error::UserError(_)
        | Error::CaptchaRequired(_)
        | Error::PinLocked(_)
        | Error::IncorrectPin(_) => 1,
        Error::Unexpected(_) => 2,
        Error::Io(_) => 3,
        Error::UntrustedKey(_) => 4,
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_error_taxonomy() {
        assert_eq!(status_for(&Error::UserError("bad input".into())), 1);
        assert_eq!(status_for(&Error::CaptchaRequired("c".into())), 1);
        assert_eq!(status_for(&Error::PinLocked(1000)), 1);
        assert_eq!(status_for(&Error::IncorrectPin(4)), 1);
        assert_eq!(status_for(&Error::Unexpected("boom".into())), 2);
        assert_eq!(status_for(&Error::Io("offline".into())), 3);
        assert_eq!(status_for(&Error::UntrustedKey("+14155550101".into())), 4);
    }
}
