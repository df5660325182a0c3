use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use poolwright_api::{HttpGateway, HttpGatewayConfig};
use poolwright_core::declaration::TemplateFilter;
use poolwright_provisioner::orchestrate::{self, failures};
use poolwright_provisioner::resolve::{TemplateQuery, lookup_template};
use poolwright_provisioner::{
    ApplyOptions, Manifest, PoolRef, Reconciler, ResourceAddr, StatePersistence, StateStore,
    TrackedPool,
};

use crate::config::{self, PoolwrightConfig};
use crate::render::{self, OutputFormat};

/// Reconcile instance pools against a declarative manifest.
#[derive(Debug, Parser)]
#[command(name = "poolwright")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the user config directory).
    #[arg(long, global = true, env = "POOLWRIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// State file, overriding the config.
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show what apply would change, without changing anything.
    Plan(ManifestArgs),

    /// Converge every declared pool and remove undeclared ones.
    Apply {
        #[command(flatten)]
        manifest: ManifestArgs,

        /// Allow plans that delete and recreate a pool.
        #[arg(long)]
        allow_replace: bool,
    },

    /// Delete every tracked pool.
    Destroy,

    /// Start tracking an existing pool.
    Import {
        /// Address to track it under, e.g. `instance_pool.web` or `web`.
        addr: ResourceAddr,
        /// `<pool id>@<zone>`
        pool: PoolRef,
    },

    /// Look up a template by name or ID.
    Template {
        #[arg(long)]
        zone: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = FilterArg::Featured)]
        filter: FilterArg,
    },

    /// Write credentials and settings to the config file.
    Configure {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        api_secret: Option<String>,
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        state_path: Option<PathBuf>,
        /// Print the current config (secrets redacted) and exit.
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Args)]
struct ManifestArgs {
    /// Manifest file.
    #[arg(short, long, default_value = "poolwright.json")]
    manifest: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FilterArg {
    Featured,
    Mine,
}

impl From<FilterArg> for TemplateFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::Featured => TemplateFilter::Featured,
            FilterArg::Mine => TemplateFilter::Mine,
        }
    }
}

struct Context {
    config: PoolwrightConfig,
    state_path: PathBuf,
    format: OutputFormat,
    cancel: CancellationToken,
}

impl Context {
    fn reconciler(&self) -> eyre::Result<Reconciler> {
        let (key, secret) = self.config.credentials()?;
        let mut http = HttpGatewayConfig::new(key, secret);
        if let Some(endpoint) = &self.config.endpoint {
            http.endpoint = endpoint.clone();
        }
        let gateway = HttpGateway::new(http)?;
        Ok(Reconciler::new(Arc::new(gateway), self.config.timeouts))
    }

    async fn store(&self) -> eyre::Result<Arc<StateStore>> {
        let persistence = StatePersistence::new(&self.state_path);
        Ok(Arc::new(StateStore::open(persistence).await?))
    }
}

impl Cli {
    pub async fn run(self, cancel: CancellationToken) -> eyre::Result<()> {
        let config_path = match self.config {
            Some(path) => path,
            None => config::default_path()?,
        };
        let file_config = config::load(&config_path)?;

        if let Command::Configure {
            api_key,
            api_secret,
            endpoint,
            state_path,
            show,
        } = self.command
        {
            let mut config = file_config;
            if !show {
                config.api_key = api_key.unwrap_or(config.api_key);
                config.api_secret = api_secret.unwrap_or(config.api_secret);
                config.endpoint = endpoint.or(config.endpoint);
                config.state_path = state_path.or(config.state_path);
                config::save(&config_path, &config)?;
            }
            println!("{}", render::json(&config::config_info(&config_path, &config))?);
            return Ok(());
        }

        let config = file_config.with_env_overrides();
        let ctx = Context {
            state_path: self.state.unwrap_or_else(|| config.state_path()),
            config,
            format: self.format,
            cancel,
        };

        match self.command {
            Command::Plan(args) => plan(&ctx, args).await,
            Command::Apply {
                manifest,
                allow_replace,
            } => apply(&ctx, manifest, ApplyOptions { allow_replace }).await,
            Command::Destroy => destroy(&ctx).await,
            Command::Import { addr, pool } => import(&ctx, addr, pool).await,
            Command::Template {
                zone,
                id,
                name,
                filter,
            } => {
                let query = TemplateQuery {
                    zone,
                    id,
                    name,
                    filter: filter.into(),
                };
                template(&ctx, query).await
            }
            Command::Configure { .. } => Ok(()),
        }
    }
}

async fn plan(ctx: &Context, args: ManifestArgs) -> eyre::Result<()> {
    let manifest = Manifest::load(&args.manifest).await?;
    let reconciler = ctx.reconciler()?;
    let store = ctx.store().await?;

    let plans = orchestrate::plan_all(&reconciler, &manifest, &store, &ctx.cancel).await?;
    match ctx.format {
        OutputFormat::Text => print!("{}", render::plans(&plans)),
        OutputFormat::Json => println!("{}", render::json(&plans)?),
    }
    Ok(())
}

async fn apply(ctx: &Context, args: ManifestArgs, options: ApplyOptions) -> eyre::Result<()> {
    let manifest = Manifest::load(&args.manifest).await?;
    let reconciler = ctx.reconciler()?;
    let store = ctx.store().await?;

    let plans = orchestrate::plan_all(&reconciler, &manifest, &store, &ctx.cancel).await?;
    if ctx.format == OutputFormat::Text {
        print!("{}", render::plans(&plans));
    }
    if !plans.iter().any(|p| p.needs_apply()) {
        return Ok(());
    }

    let results = orchestrate::apply_all(&reconciler, &manifest, store, options, &ctx.cancel).await?;
    let failed = failures(&results).count();

    match ctx.format {
        OutputFormat::Json => {
            let report: Vec<serde_json::Value> = results
                .iter()
                .map(|r| match &r.result {
                    Ok(steps) => serde_json::json!({"addr": r.addr, "applied": steps}),
                    Err(e) => serde_json::json!({
                        "addr": r.addr,
                        "error": e.to_string(),
                        "kind": format!("{:?}", e.kind()),
                    }),
                })
                .collect();
            println!("{}", render::json(&report)?);
        }
        OutputFormat::Text => {
            for r in &results {
                match &r.result {
                    Ok(steps) if steps.is_empty() => {}
                    Ok(steps) => println!("{}: {} step(s) applied", r.addr, steps.len()),
                    Err(e) => println!("{}: failed: {e}", r.addr),
                }
            }
        }
    }

    if failed > 0 {
        return Err(eyre::eyre!("{failed} of {} pool(s) failed", results.len()));
    }
    Ok(())
}

async fn destroy(ctx: &Context) -> eyre::Result<()> {
    let reconciler = ctx.reconciler()?;
    let persistence = StatePersistence::new(&ctx.state_path);
    poolwright_provisioner::destroy(&reconciler, persistence, &ctx.cancel).await?;
    println!("All tracked instance pools destroyed.");
    Ok(())
}

async fn import(ctx: &Context, addr: ResourceAddr, pool: PoolRef) -> eyre::Result<()> {
    let reconciler = ctx.reconciler()?;
    let store = ctx.store().await?;
    if let Some(existing) = store.get(&addr).await {
        return Err(eyre::eyre!("{addr} already tracks pool {}", existing.id));
    }

    let observed = reconciler.import(&addr, &pool).await?;
    store
        .record(
            addr.clone(),
            TrackedPool {
                id: observed.state.id.clone(),
                zone: observed.state.zone.clone(),
                attributes: observed.attributes.clone(),
                updated_at: jiff::Timestamp::now(),
            },
        )
        .await?;

    match ctx.format {
        OutputFormat::Text => println!("{addr} now tracks {pool}"),
        OutputFormat::Json => println!("{}", render::json(&observed.attributes)?),
    }
    Ok(())
}

async fn template(ctx: &Context, query: TemplateQuery) -> eyre::Result<()> {
    let reconciler = ctx.reconciler()?;
    let found = lookup_template(reconciler.gateway(), &query).await?;
    match ctx.format {
        OutputFormat::Text => {
            println!("id:           {}", found.id);
            println!("name:         {}", found.name);
            println!("default user: {}", found.default_user.as_deref().unwrap_or("-"));
        }
        OutputFormat::Json => println!("{}", render::json(&found)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_import_arguments() {
        let cli = Cli::try_parse_from([
            "poolwright",
            "import",
            "web",
            "3f4e8a2c-1b6d-4c3a-9e7f-5a6b7c8d9e0f@ch-gva-2",
        ])
        .unwrap();
        let Command::Import { addr, pool } = cli.command else {
            panic!("expected import");
        };
        assert_eq!(addr, ResourceAddr::instance_pool("web"));
        assert_eq!(pool.zone, "ch-gva-2");
    }

    #[test]
    fn bad_pool_reference_is_a_usage_error() {
        assert!(Cli::try_parse_from(["poolwright", "import", "web", "web@ch-gva-2"]).is_err());
    }

    #[test]
    fn apply_flags() {
        let cli = Cli::try_parse_from([
            "poolwright",
            "--log-json",
            "apply",
            "-m",
            "pools.json",
            "--allow-replace",
        ])
        .unwrap();
        assert!(cli.log_json);
        let Command::Apply {
            manifest,
            allow_replace,
        } = cli.command
        else {
            panic!("expected apply");
        };
        assert!(allow_replace);
        assert_eq!(manifest.manifest, PathBuf::from("pools.json"));
    }
}
