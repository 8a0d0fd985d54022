use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use kube::{
  api::Api,
  runtime::{
    controller::{self, Action, Controller},
    finalizer, watcher,
  },
  Client, ResourceExt,
};
use log::{debug, error, info};
use thiserror::Error;

use mapper::{
  client::{connect, ConfigMapClient},
  config::Config,
  retry::{self, Intent, Outcome},
  MapRole, Store,
};

const FINALIZER: &str = "aws-auth-operator.controlant.com";

#[derive(Debug, Error)]
enum AppError {
  #[error("Mapping error: {0}")]
  Mapping(#[from] mapper::Error),
}

struct Context {
  client: Client,
  config: Config,
}

impl Context {
  fn store(&self) -> Store<ConfigMapClient> {
    Store::new(ConfigMapClient::new(
      self.client.clone(),
      &self.config.namespace,
      &self.config.configmap,
    ))
  }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  env_logger::init();

  let config = Config::from_env()?;
  let client = connect(config.kube_context.as_deref()).await?;
  let crd = Api::<MapRole>::all(client.clone());

  Controller::new(crd, watcher::Config::default())
    .run(
      reconcile,
      |_, _, _| Action::requeue(Duration::from_secs(60)),
      Arc::new(Context { client, config }),
    )
    .for_each(|res| async move {
      match res {
        Ok(o) => {
          info!("Reconciled {:?}", o);
        }
        Err(controller::Error::ObjectNotFound(or)) => {
          info!("Object not found: {:?}", or);
        }
        Err(e) => {
          error!("Reconcile failed: {:?}", e);
        }
      }
    })
    .await;

  Ok(())
}

async fn reconcile(
  maprole: Arc<MapRole>,
  ctx: Arc<Context>,
) -> Result<Action, finalizer::Error<AppError>> {
  debug!("Reconcile for: {:?}", &maprole);

  let namespace = maprole.namespace().ok_or(finalizer::Error::<AppError>::UnnamedObject)?;
  let mr_api = Api::<MapRole>::namespaced(ctx.client.clone(), &namespace);

  finalizer::finalizer(&mr_api, FINALIZER, maprole, |ev| async move {
    match ev {
      finalizer::Event::Apply(mr) => apply(mr, &ctx).await,
      finalizer::Event::Cleanup(mr) => cleanup(mr, &ctx).await,
    }
  })
  .await
}

async fn apply(mr: Arc<MapRole>, ctx: &Context) -> Result<Action, AppError> {
  let intent = Intent::Upsert(mr.spec.to_mapping()?);
  let mut store = ctx.store();

  match retry::apply(&mut store, &intent, ctx.config.max_attempts).await? {
    Outcome::Unchanged => Ok(Action::requeue(Duration::from_secs(60))),
    _ => {
      info!("Mapped {} for {}", intent.arn(), mr.name_any());
      Ok(Action::requeue(Duration::from_secs(300)))
    }
  }
}

async fn cleanup(mr: Arc<MapRole>, ctx: &Context) -> Result<Action, AppError> {
  let intent = match mr.spec.cleanup_intent() {
    Some(intent) => intent,
    None => {
      debug!("{} never mapped anything", mr.name_any());
      return Ok(Action::await_change());
    }
  };
  let mut store = ctx.store();

  match retry::apply(&mut store, &intent, ctx.config.max_attempts).await {
    Ok(_) => info!("Unmapped {} for {}", intent.arn(), mr.name_any()),
    Err(mapper::Error::NotFound { .. }) => debug!("{} was already unmapped", intent.arn()),
    Err(e) => return Err(e.into()),
  }

  Ok(Action::await_change())
}
