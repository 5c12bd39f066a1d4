use anyhow::Context;
use clap::Parser;
use esim_checkout::utils::{logger, validation::Validate};
use esim_checkout::{
    synthesize, ApiConfig, CancellationToken, CheckoutEngine, CheckoutOutcome, CheckoutProgress,
    ClassifiedError, CliConfig, Command, ConfigError, ErrorCategory, HttpTransport, InstallUrl,
    TokioSleeper, TomlConfig,
};
use esim_checkout::domain::model::ProvisioningProfile;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting esim-checkout CLI");

    // 不需要 API 的指令直接處理
    if let Command::InstallUrl {
        smdp_address,
        matching_id,
    } = &cli.command
    {
        let mut profile = ProvisioningProfile::pending("manual");
        profile.smdp_address = Some(smdp_address.clone());
        profile.matching_id = Some(matching_id.clone());
        match synthesize(&profile) {
            Some(url) => println!("{}", url),
            None => {
                eprintln!("❌ Both an SM-DP+ address and a matching ID are required");
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let (config, api) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("❌ Configuration failed: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };
    tracing::debug!("API config: {:?}", api);

    let transport = Arc::new(HttpTransport::new(&api).context("creating HTTP client")?);
    let mut options = config.checkout_options().context("reading checkout options")?;

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx, cli.json_logs));

    let result = match &cli.command {
        Command::Plans { region } => {
            let engine = CheckoutEngine::new(transport, Arc::new(TokioSleeper), options);
            engine.catalog().list_plans(region).await.map(|plans| {
                if plans.is_empty() {
                    println!("No plans found for '{}'", region);
                }
                for plan in plans {
                    println!(
                        "{:<32} {:>10} {:>4} days  {:>8}",
                        plan.bundle_identifier,
                        plan.data_display(),
                        plan.duration_days,
                        plan.price_display()
                    );
                }
            })
        }
        Command::Verify { bundle } => {
            let engine = CheckoutEngine::new(transport, Arc::new(TokioSleeper), options);
            engine.verifier().verify(bundle).await.map(|plan| {
                println!(
                    "✅ {} is available: {} for {} days at {}",
                    plan.bundle_identifier,
                    plan.data_display(),
                    plan.duration_days,
                    plan.price_display()
                );
            })
        }
        Command::Checkout {
            bundle,
            allow_reassign,
        } => {
            options.allow_reassign |= *allow_reassign;
            let engine = CheckoutEngine::new(transport, Arc::new(TokioSleeper), options)
                .with_progress(tx.clone());
            run_checkout(&engine, bundle).await
        }
        Command::InstallUrl { .. } => Ok(()),
    };

    drop(tx);
    let _ = printer.await;

    if let Err(e) = result {
        report_failure(&e);
    }

    Ok(())
}

/// 命令列的 --base-url / --api-key 先覆寫檔案內容，再驗證
fn load_config(cli: &CliConfig) -> Result<(TomlConfig, ApiConfig), ConfigError> {
    tracing::info!("📁 Loading configuration from: {}", cli.config);
    let config = TomlConfig::from_file(&cli.config)?
        .with_api_overrides(cli.base_url.clone(), cli.api_key.clone());
    config.validate()?;
    let api = config.api_config()?;
    Ok((config, api))
}

async fn run_checkout(
    engine: &CheckoutEngine<HttpTransport, TokioSleeper>,
    bundle: &str,
) -> Result<(), ClassifiedError> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, stopping checkout");
                cancel.cancel();
            }
        })
    };

    let outcome = engine.start_checkout(bundle, &cancel).await;
    watcher.abort();

    match outcome? {
        CheckoutOutcome::Completed(receipt) => {
            println!("✅ Order {} completed", receipt.order.order_reference);
            if let Some(qr) = &receipt.profile.qr_code_payload {
                println!("📲 QR payload: {}", qr);
            }
            match &receipt.install_url {
                Some(url) => print_install_url(url),
                None => println!(
                    "ℹ️ No install link available, enter the activation details manually"
                ),
            }
            if let Some(iccid) = &receipt.profile.iccid {
                println!("   ICCID: {}", iccid);
            }
        }
        CheckoutOutcome::Cancelled => println!("Checkout cancelled"),
    }
    Ok(())
}

fn print_install_url(url: &InstallUrl) {
    println!("🔗 Install URL: {}", url);
    if let Some((smdp, matching_id)) = url.components() {
        println!("   SM-DP+ address: {}", smdp);
        println!("   Matching ID:    {}", matching_id);
    }
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<CheckoutProgress>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{}", line),
                Err(e) => tracing::debug!("Could not serialise progress event: {}", e),
            }
        } else {
            eprintln!("… {:?}", event.step);
        }
    }
}

fn report_failure(e: &ClassifiedError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Checkout failed: {} (Category: {:?}, Retryable: {})",
        e,
        e.category,
        e.retryable
    );
    if let Some(source) = &e.source {
        tracing::error!("   caused by: {}", source);
    }

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    // 根據錯誤分類決定退出碼
    let exit_code = match e.category {
        ErrorCategory::Validation => 2,
        ErrorCategory::NotFound => 3,
        ErrorCategory::InsufficientBalance => 4,
        ErrorCategory::Transient => 5,
        ErrorCategory::Unknown => 1,
    };
    std::process::exit(exit_code);
}
