//! codelens CLI entry point.

use codelens_lib::cli::{self, Cli};
use codelens_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
