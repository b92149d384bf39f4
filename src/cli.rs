//! CLI interface for sagepipe

use crate::backends::sagemaker::SageMakerClient;
use crate::backends::credentials;
use crate::backends::sigv4::Credentials;
use crate::backends::ssm::SsmClient;
use crate::backends::stepfunctions::StepFunctionsClient;
use crate::config::Settings;
use crate::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use crate::notifier::{self, runtime::RuntimeClient};
use crate::parser::{parse_definition_file, DefinitionFormat};
use crate::pipeline::create_pipeline;
use crate::runner::{self, WaiterConfig};
use crate::workflow::{create_workflow, state_machine_arn, ExecutionInputs, Workflow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

/// sagepipe - declarative ML pipelines for SageMaker Pipelines and Step Functions
#[derive(Parser, Debug)]
#[command(name = "sagepipe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative ML pipeline graphs for SageMaker Pipelines and Step Functions", long_about = None)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    pub log_format: LogFormat,

    /// Settings file (JSON, TOML or YAML); missing file is ignored
    #[arg(short, long, default_value = "config.json", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// SageMaker pipeline (template variant)
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },

    /// Step Functions workflow (chain variant)
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Model-name notification function
    Notifier {
        #[command(subcommand)]
        command: NotifierCommands,
    },

    /// Summarize an exported pipeline or state machine definition
    Inspect {
        /// Path to definition JSON file
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommands {
    /// Print the pipeline definition
    Definition,

    /// Write the pipeline definition to a file
    Export {
        #[arg(short, long, default_value = "pipeline_template.json")]
        output: PathBuf,
    },

    /// Upsert the pipeline, start an execution and wait for it
    Run {
        /// Return once the execution has started
        #[arg(long)]
        no_wait: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommands {
    /// Print the state machine definition
    Definition,

    /// Create the state machine (an existing one is reused)
    Create,

    /// Start an execution of the existing state machine
    Execute {
        /// Execution input as a JSON object; generated when omitted
        #[arg(long)]
        input: Option<String>,

        /// State machine ARN; derived from settings when omitted
        #[arg(long)]
        state_machine_arn: Option<String>,
    },

    /// Create the state machine and start an execution with fresh inputs
    Run,
}

#[derive(Subcommand, Debug)]
pub enum NotifierCommands {
    /// Handle a single event locally
    Invoke {
        /// Event JSON, e.g. '{"model_name": "my-model"}'
        #[arg(long)]
        event: String,
    },

    /// Serve invocations from the Lambda Runtime API
    Serve,
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        let config = LogConfig {
            level: self.log_level,
            format: self.log_format,
            ..LogConfig::default()
        };

        init_logging(&config)
    }

    fn settings(&self) -> anyhow::Result<Settings> {
        Ok(Settings::load(Some(self.config.as_path()))?)
    }

    /// Settings plus host credentials, for commands that call AWS
    async fn aws_settings(&self) -> anyhow::Result<(Settings, Credentials)> {
        let mut settings = self.settings()?;
        let credentials = credentials::resolve(&mut settings).await?;
        Ok((settings, credentials))
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Pipeline { command } => self.handle_pipeline_command(command).await?,
            Commands::Workflow { command } => self.handle_workflow_command(command).await?,
            Commands::Notifier { command } => self.handle_notifier_command(command).await?,
            Commands::Inspect { file } => self.inspect(file)?,
        }
        Ok(())
    }

    /// Handle pipeline commands
    async fn handle_pipeline_command(&self, command: &PipelineCommands) -> anyhow::Result<()> {
        match command {
            PipelineCommands::Definition => {
                let pipeline = create_pipeline(&self.settings()?)?;
                info!("Execution order: {}", pipeline.execution_order()?.join(" -> "));
                println!("{}", serde_json::to_string_pretty(&pipeline.definition()?)?);
            }
            PipelineCommands::Export { output } => {
                let pipeline = create_pipeline(&self.settings()?)?;
                pipeline.export(output)?;
                println!("Pipeline definition written to {}", output.display());
            }
            PipelineCommands::Run { no_wait } => {
                let (settings, credentials) = self.aws_settings().await?;
                let pipeline = create_pipeline(&settings)?;
                let backend = SageMakerClient::new(&settings, credentials)?;
                let role = settings.sagemaker_role()?;

                if *no_wait {
                    let started = runner::start_pipeline(&backend, &pipeline, role).await?;
                    println!("Pipeline: {}", started.pipeline_arn);
                    println!("Execution: {}", started.execution_arn);
                    return Ok(());
                }

                let waiter = WaiterConfig::from_settings(&settings);
                let report = runner::run_pipeline(&backend, &pipeline, role, &waiter).await?;

                println!("Pipeline: {}", report.pipeline_arn);
                println!("Execution: {}", report.execution.arn);
                println!("Status: {}", report.execution.status);
                if let Some(reason) = &report.execution.failure_reason {
                    println!("Failure reason: {}", reason);
                }
                println!("Steps:");
                for step in &report.steps {
                    match &step.failure_reason {
                        Some(reason) => {
                            println!("  - {} [{}] {}", step.step_name, step.step_status, reason)
                        }
                        None => println!("  - {} [{}]", step.step_name, step.step_status),
                    }
                }

                if !report.succeeded() {
                    error!("Pipeline execution did not succeed");
                    std::process::exit(1);
                }
                info!("Pipeline execution succeeded");
            }
        }
        Ok(())
    }

    /// Workflow built for the resolved region, plus its backend
    async fn workflow_backend(&self) -> anyhow::Result<(Settings, Workflow, StepFunctionsClient)> {
        let (settings, credentials) = self.aws_settings().await?;
        let workflow = create_workflow(&settings)?;
        let backend = StepFunctionsClient::new(&settings, credentials)?;
        Ok((settings, workflow, backend))
    }

    /// Handle workflow commands
    async fn handle_workflow_command(&self, command: &WorkflowCommands) -> anyhow::Result<()> {
        match command {
            WorkflowCommands::Definition => {
                let workflow = create_workflow(&self.settings()?)?;
                println!("{}", serde_json::to_string_pretty(&workflow.definition()?)?);
            }
            WorkflowCommands::Create => {
                let (_, workflow, backend) = self.workflow_backend().await?;
                let arn = runner::create_state_machine(&backend, &workflow).await?;
                println!("State machine: {}", arn);
            }
            WorkflowCommands::Execute {
                input,
                state_machine_arn: arn_override,
            } => {
                let (settings, workflow, backend) = self.workflow_backend().await?;
                let inputs = match input {
                    Some(json) => ExecutionInputs::from_json(json)?,
                    None => ExecutionInputs::generate(&settings),
                };
                let arn = match arn_override {
                    Some(arn) => arn.clone(),
                    None => state_machine_arn(&settings)?,
                };

                let execution_arn =
                    runner::execute_workflow(&backend, &workflow, &arn, &inputs).await?;
                println!("Execution: {}", execution_arn);
                println!("Input: {}", inputs.to_json_string()?);
            }
            WorkflowCommands::Run => {
                let (settings, workflow, backend) = self.workflow_backend().await?;
                let submission = runner::submit_workflow(
                    &backend,
                    &workflow,
                    ExecutionInputs::generate(&settings),
                )
                .await?;
                println!("State machine: {}", submission.state_machine_arn);
                println!("Execution: {}", submission.execution_arn);
                println!("Input: {}", submission.inputs.to_json_string()?);
            }
        }
        Ok(())
    }

    /// Handle notifier commands
    async fn handle_notifier_command(&self, command: &NotifierCommands) -> anyhow::Result<()> {
        let (settings, credentials) = self.aws_settings().await?;
        let store = SsmClient::new(
            &settings.region,
            settings.endpoint_url.as_deref(),
            credentials,
        )?;

        match command {
            NotifierCommands::Invoke { event } => {
                let event: serde_json::Value = serde_json::from_str(event)?;
                let response = notifier::handle(&event, &store, &settings.parameter_name).await?;
                println!("{}", serde_json::to_string(&response)?);
            }
            NotifierCommands::Serve => {
                let runtime = RuntimeClient::from_env()?;
                info!("Serving notifier invocations");
                notifier::runtime::serve(&runtime, &store, &settings.parameter_name).await?;
            }
        }
        Ok(())
    }

    /// Summarize a definition file
    fn inspect(&self, file: &PathBuf) -> anyhow::Result<()> {
        info!("Inspecting definition: {:?}", file);
        let summary = parse_definition_file(file)?;

        let kind = match summary.format {
            DefinitionFormat::Pipeline => "SageMaker pipeline",
            DefinitionFormat::StateMachine => "Step Functions state machine",
        };
        println!("Format: {}", kind);
        if !summary.parameters.is_empty() {
            println!("Parameters: {}", summary.parameters.join(", "));
        }
        println!("Steps: {}", summary.steps.len());
        for step in &summary.steps {
            println!("  - {} ({})", step.name, step.step_type);
        }
        println!("Order: {}", summary.step_names().join(" -> "));

        Ok(())
    }
}
