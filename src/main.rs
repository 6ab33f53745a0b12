use clap::Parser;
use sheet_etl::config::{Command, RunArgs};
use sheet_etl::domain::ports::{Storage, WorkbookCodec};
use sheet_etl::utils::error::ErrorSeverity;
use sheet_etl::utils::{logger, validation::Validate};
use sheet_etl::{
    builtin_registry, CliArgs, EngineError, LocalStorage, SheetDataMap, TemplateConfig, TemplateContext,
    TemplateManager, ZipCsvWorkbook,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("🚀 Starting sheet-etl");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    if let Err(e) = run(args).await {
        tracing::error!(
            "❌ sheet-etl failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };

        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn run(args: CliArgs) -> Result<(), EngineError> {
    args.validate()?;

    tracing::info!("📁 Loading template configuration from: {}", args.config);
    let config = TemplateConfig::load(&args.config)?;
    let settings = config.engine.clone();

    let registry = Arc::new(builtin_registry()?);
    let manager = TemplateManager::new(Arc::new(config), registry).with_settings(settings);
    manager.verify_units()?;

    let codec = ZipCsvWorkbook::new();

    match &args.command {
        Command::Check => {
            println!("✅ Configuration is valid and every referenced unit is registered");
            println!("🧩 Processing units: {}", manager.registry().processor_names().join(", "));
            println!("🧩 Generation units: {}", manager.registry().generator_names().join(", "));
            println!(
                "⚙️ Concurrent sheets: {}, request timeout: {}",
                manager.settings().max_concurrent_sheets,
                manager
                    .settings()
                    .request_timeout_seconds
                    .map_or_else(|| "none".to_string(), |seconds| format!("{}s", seconds))
            );
        }
        Command::Process { input, run } => {
            let bytes = tokio::fs::read(input).await?;
            let workbook = codec.decode(&bytes)?;
            let context = run.context();

            tracing::info!("🎬 Processing '{}' with template '{}'", input, run.template);
            let result = manager
                .run_processing_until(&run.template, &workbook, &context, shutdown_signal())
                .await?;

            let output = write_workbook(&manager, &codec, run, &result, &context, "processed").await?;
            println!("✅ Processing completed successfully!");
            println!("🆔 Execution ID: {}", context.execution_id);
            println!("📁 Output saved to: {}", output);
        }
        Command::Generate { run } => {
            let context = run.context();

            tracing::info!("🎬 Generating template '{}'", run.template);
            let result = manager
                .run_generation_until(&run.template, &context, shutdown_signal())
                .await?;

            let output = write_workbook(&manager, &codec, run, &result, &context, "template").await?;
            println!("✅ Template generated successfully!");
            println!("📁 Output saved to: {}", output);
        }
    }

    Ok(())
}

/// Ctrl-C 視為取消請求
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn write_workbook(
    manager: &TemplateManager,
    codec: &ZipCsvWorkbook,
    run: &RunArgs,
    result: &SheetDataMap,
    context: &TemplateContext,
    suffix: &str,
) -> Result<String, EngineError> {
    let layouts = manager.sheet_layouts(&run.template, result)?;
    let bytes = codec.encode(&layouts)?;

    let storage = LocalStorage::new(&run.output_dir);
    let file_name = run.output_file(context, suffix);
    storage.write_file(&file_name, &bytes).await?;
    Ok(storage.full_path(&file_name).display().to_string())
}
