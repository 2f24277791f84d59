use clap::Parser;
use std::process::ExitCode;

use mailcal::cli::{self, Cli};
use mailcal::Error;

const CALDAV_401_HINT: &str = "Calendar returned 401. Google may require OAuth for CalDAV for your account. \
Use the same app password only for mail (IMAP/SMTP).";

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    cli::init_logging(&cli.log_level);

    match cli::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(Error::Authorization(_)) = err.downcast_ref::<Error>() {
                eprintln!("{CALDAV_401_HINT}");
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
