fn main() -> anyhow::Result<()> {
    vecgrep::cli::run()
}
