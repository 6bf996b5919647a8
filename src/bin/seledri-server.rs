use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let token = CancellationToken::new();

    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        }
    });

    if let Err(err) = seledri::server::run(token).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
