pub mod cli;
pub mod template_config;

#[cfg(feature = "cli")]
pub use self::args::{CliArgs, Command, RunArgs};

#[cfg(feature = "cli")]
mod args {
    use crate::domain::model::TemplateContext;
    use crate::utils::error::Result;
    use crate::utils::validation::{validate_non_empty_string, Validate};
    use clap::{Args, Parser, Subcommand};
    use serde_json::{Map, Value};

    #[derive(Debug, Clone, Parser)]
    #[command(name = "sheet-etl")]
    #[command(about = "Template-driven spreadsheet import/export engine")]
    pub struct CliArgs {
        /// Path to the template configuration file
        #[arg(short, long, default_value = "configs/templates.toml")]
        pub config: String,

        /// Enable verbose output
        #[arg(short, long, global = true)]
        pub verbose: bool,

        /// Emit logs as JSON lines
        #[arg(long, global = true)]
        pub json_logs: bool,

        #[command(subcommand)]
        pub command: Command,
    }

    #[derive(Debug, Clone, Subcommand)]
    pub enum Command {
        /// Run the processing units of a template over an uploaded workbook
        Process {
            /// Workbook (zip of CSV files) to process
            #[arg(long)]
            input: String,

            #[command(flatten)]
            run: RunArgs,
        },
        /// Produce a downloadable workbook from the generation units of a template
        Generate {
            #[command(flatten)]
            run: RunArgs,
        },
        /// Validate the configuration and verify that every referenced unit is registered
        Check,
    }

    #[derive(Debug, Clone, Args)]
    pub struct RunArgs {
        /// Template identifier
        #[arg(short, long)]
        pub template: String,

        #[arg(long, default_value = "./output")]
        pub output_dir: String,

        /// Execution ID for this run
        #[arg(long)]
        pub execution_id: Option<String>,

        /// Shared context values, e.g. `--shared strict=true --shared tenant=acme`
        #[arg(long = "shared", value_parser = parse_shared_value)]
        pub shared: Vec<(String, Value)>,
    }

    impl RunArgs {
        pub fn context(&self) -> TemplateContext {
            let context = match &self.execution_id {
                Some(id) => TemplateContext::new(id.clone()),
                None => TemplateContext::generated(),
            };
            let shared: Map<String, Value> = self.shared.iter().cloned().collect();
            context.with_shared_data(shared)
        }

        pub fn output_file(&self, context: &TemplateContext, suffix: &str) -> String {
            format!("{}_{}_{}.zip", self.template, suffix, context.execution_id)
        }
    }

    /// `key=value`；值能解析成 JSON 時取 JSON，否則當字串
    fn parse_shared_value(raw: &str) -> std::result::Result<(String, Value), String> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("missing key in '{}'", raw));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        Ok((key.to_string(), value))
    }

    impl Validate for CliArgs {
        fn validate(&self) -> Result<()> {
            validate_non_empty_string("config", &self.config)?;
            match &self.command {
                Command::Process { input, run } => {
                    validate_non_empty_string("input", input)?;
                    run.validate()
                }
                Command::Generate { run } => run.validate(),
                Command::Check => Ok(()),
            }
        }
    }

    impl Validate for RunArgs {
        fn validate(&self) -> Result<()> {
            validate_non_empty_string("template", &self.template)?;
            validate_non_empty_string("output_dir", &self.output_dir)?;
            if let Some(id) = &self.execution_id {
                validate_non_empty_string("execution_id", id)?;
            }
            Ok(())
        }
    }

}
