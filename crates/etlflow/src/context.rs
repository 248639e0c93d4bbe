use anyhow::Context as _;
use clap::Args;
use etlflow_config::StackConfig;
use etlflow_core::ManifestLoader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (default: etlflow.yaml discovery)
    #[arg(short, long, global = true, env = etlflow_config::CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Directory holding app_resources and the handler sources
    #[arg(long, global = true, env = etlflow_config::SOURCE_DIR_ENV)]
    pub source_dir: Option<PathBuf>,

    /// AWS region, overriding the config file
    #[arg(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Everything a command needs to know about the project
pub struct Context {
    pub config: StackConfig,
    pub source_dir: PathBuf,
    /// Parent of the source directory. Holds `deployment/` and `.etlflow/`.
    pub project_root: PathBuf,
    pub region: Option<String>,
}

impl Context {
    pub fn load(args: &GlobalArgs) -> anyhow::Result<Self> {
        let config = etlflow_config::load_config(args.config.as_deref())?;

        let source_dir = match &args.source_dir {
            Some(dir) => dir.clone(),
            None => etlflow_config::find_source_dir()?,
        };
        let source_dir = source_dir.canonicalize().with_context(|| {
            format!("Source directory {} is not accessible", source_dir.display())
        })?;

        let project_root = source_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| source_dir.clone());

        let region = args.region.clone().or_else(|| config.region.clone());

        debug!(
            stack = %config.stack_name,
            source = %source_dir.display(),
            region = ?region,
            "Loaded project context"
        );

        Ok(Self {
            config,
            source_dir,
            project_root,
            region,
        })
    }

    pub fn loader(&self) -> ManifestLoader {
        ManifestLoader::new(&self.source_dir)
    }

    pub fn build_stack(&self) -> anyhow::Result<etlflow_infra::Stack> {
        Ok(etlflow_infra::build_stack(&self.config, &self.loader())?)
    }

    pub fn deployment_dir(&self) -> PathBuf {
        self.project_root.join("deployment")
    }
}
