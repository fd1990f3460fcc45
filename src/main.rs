use frontier_webview::{Browser, BridgeConfig, BrowserEvent};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let scripts: Vec<String> = std::env::args().skip(1).collect();
    if scripts.is_empty() {
        eprintln!("usage: frontier-webview <script>...");
        eprintln!("each script runs as a function body; use `return` to print a value");
        std::process::exit(2);
    }

    let config = BridgeConfig::from_env().unwrap_or_else(|err| {
        eprintln!("Failed to load bridge configuration: {err}. Using defaults.");
        BridgeConfig::default()
    });

    let browser = Browser::with_quickjs(config).unwrap_or_else(|err| {
        eprintln!("Failed to start script host: {err:#}");
        std::process::exit(1);
    });
    browser.add_listener(|_, event| {
        if let BrowserEvent::TitleChanged(title) = event {
            info!("title changed: {title}");
        }
    });

    let mut failed = false;
    for script in &scripts {
        match browser.evaluate(script) {
            Ok(value) => println!("{value}"),
            Err(err) => {
                eprintln!("{err}");
                failed = true;
            }
        }
    }

    browser.dispose();
    if failed {
        std::process::exit(1);
    }
}
