//! Error handling for the binary entry point

use tracing::error;

/// Report a fatal error and exit with a status derived from it
///
/// `BatchError`s print their user message and map to their own exit code;
/// anything else exits with 1. With `verbose >= 1` the full cause chain is
/// printed as well.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    use crate::error::BatchError;

    error!("Fatal error: {}", error);

    let exit_code = if let Some(batch_err) = error.downcast_ref::<BatchError>() {
        eprintln!("{}", batch_err.user_message());
        batch_err.exit_code()
    } else {
        eprintln!("Error: {error}");
        1
    };

    if verbose >= 1 {
        eprintln!("\nError chain:");
        for (i, cause) in error.chain().enumerate() {
            eprintln!("  {}: {}", i, cause);
        }
    }

    std::process::exit(exit_code)
}
