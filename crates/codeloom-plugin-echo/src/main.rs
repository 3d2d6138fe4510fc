//! Binary entrypoint for the reference plugin executable.

#[tokio::main]
async fn main() {
    codeloom_plugin_echo::install_logging();
    codeloom_plugin_echo::server().serve_stdio().await;
}
