fn main() -> anyhow::Result<std::process::ExitCode> {
    mayasend::cli::run()
}
