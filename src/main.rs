use clap::{Parser, Subcommand};
use log::{info, warn};

use mapper::{
  client::{connect, ConfigMapClient},
  config::Config,
  retry::{self, Intent, Outcome},
  Arn, IdentityMapping, Store,
};

#[derive(Parser, Debug)]
#[command(name = "aws-auth-mapper", version, about = "Manage IAM identity mappings in aws-auth")]
struct Cli {
  /// Namespace of the ConfigMap [env: AWS_AUTH_NAMESPACE, default: kube-system]
  #[arg(long, global = true)]
  namespace: Option<String>,

  /// Name of the ConfigMap [env: AWS_AUTH_CONFIGMAP, default: aws-auth]
  #[arg(long, global = true)]
  name: Option<String>,

  /// kubeconfig context used when the default config is unavailable [env: KUBE_CTX]
  #[arg(long, global = true)]
  context: Option<String>,

  /// Attempts before giving up on concurrent writers [env: AWS_AUTH_MAX_ATTEMPTS, default: 3]
  #[arg(long, global = true)]
  max_attempts: Option<usize>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create an IAM identity mapping
  Create {
    /// ARN of the IAM role or user to map
    #[arg(long)]
    arn: Arn,
    /// Kubernetes username, may contain placeholders like {{SessionName}}
    #[arg(long)]
    username: Option<String>,
    /// Kubernetes group, repeat or separate with commas
    #[arg(long = "group", value_delimiter = ',')]
    groups: Vec<String>,
  },

  /// List IAM identity mappings
  Get {
    /// Only show mappings for this ARN
    #[arg(long)]
    arn: Option<Arn>,
  },

  /// Delete a IAM identity mapping
  Delete {
    /// ARN of the IAM role or user to delete
    #[arg(long)]
    arn: Arn,
    /// Delete all matching mappings instead of just one
    #[arg(long)]
    all: bool,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let cli = Cli::parse();
  let mut config = Config::from_env()?;
  if let Some(namespace) = cli.namespace {
    config.namespace = namespace;
  }
  if let Some(name) = cli.name {
    config.configmap = name;
  }
  if let Some(context) = cli.context {
    config.kube_context = Some(context);
  }
  if let Some(max_attempts) = cli.max_attempts {
    config.max_attempts = max_attempts;
  }
  config.validate()?;

  let client = connect(config.kube_context.as_deref()).await?;
  let mut store = Store::new(ConfigMapClient::new(client, &config.namespace, &config.configmap));

  match cli.command {
    Command::Create { arn, username, groups } => {
      let mapping = IdentityMapping::new(arn, username, groups)?;
      let intent = Intent::Add(mapping);
      retry::apply(&mut store, &intent, config.max_attempts).await?;
      info!("added identity mapping for {}", intent.arn());
    }

    Command::Get { arn } => {
      store.load().await?;
      println!("ARN\tUSERNAME\tGROUPS");
      for mapping in store.list_mappings(arn.as_ref())? {
        println!(
          "{}\t{}\t{}",
          mapping.arn(),
          mapping.username().unwrap_or("-"),
          mapping.groups().join(",")
        );
      }
    }

    Command::Delete { arn, all } => {
      let intent = Intent::Remove { arn, all };
      if let Outcome::Removed(removal) = retry::apply(&mut store, &intent, config.max_attempts).await? {
        info!("removed {} identity mapping(s) for {}", removal.removed, intent.arn());
        if removal.remaining > 0 {
          warn!(
            "there are {} mappings left with same arn {:?} (use --all to delete them at once)",
            removal.remaining,
            intent.arn().to_string()
          );
        }
      }
    }
  }

  Ok(())
}
