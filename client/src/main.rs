mod cli;

#[tokio::main]
async fn main() {
    match cli::run().await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e:#}");
            // 2 si falló el transporte, 1 para errores de usuario
            let code = if e.downcast_ref::<reqwest::Error>().is_some() {
                2
            } else {
                1
            };
            std::process::exit(code);
        }
    }
}
