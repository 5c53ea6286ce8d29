use nexo::app::App;

#[tokio::main]
async fn main() {
    if let Err(err) = App::run().await {
        eprintln!("\nError: {err}\n");
        std::process::exit(1);
    }
}
