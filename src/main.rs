fn main() -> anyhow::Result<()> {
    geonotes::cli::run()
}
