fn main() -> anyhow::Result<()> {
    tempnotes::cli::run()
}
