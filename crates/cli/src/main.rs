fn main() {
    if let Err(error) = xmlctx_cli::run() {
        // The subscriber is installed by run() right after argument parsing.
        tracing::error!(%error, "CLI execution failed");
        std::process::exit(1);
    }
}
