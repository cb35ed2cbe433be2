use anyhow::Result;

fn main() -> Result<()> {
    rustjail::cli::run()
}
