//! Minimal engine round trip: register a handler, execute a job directly,
//! then inspect the execution meters.

use std::sync::Arc;

use async_trait::async_trait;
use heron::meter::names;
use heron::{ExecutionContext, HandlerContext, JobEngine, JobHandler, JobRecord};

struct GreetHandler;

#[async_trait]
impl JobHandler for GreetHandler {
    async fn execute(&self, ctx: &HandlerContext) -> anyhow::Result<()> {
        let who = ctx.job.payload["who"].as_str().unwrap_or("world");
        println!("hello, {who}!");
        ctx.meters.mark(names::ACTIVITY_INSTANCE_START);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let engine = JobEngine::builder()
        .with_handler("greet", Arc::new(GreetHandler))
        .build();
    engine.start().await?;

    let job = JobRecord::new("greet", serde_json::json!({ "who": "heron" }), 3);
    engine.job_store().upsert(&job).await?;
    engine.execute(job.id, &ExecutionContext::direct()).await?;

    engine.report_metrics_now().await?;
    for bucket in engine.create_metrics_query().limit(5).interval().await? {
        println!(
            "{} {} = {} (reporter {})",
            bucket.timestamp, bucket.name, bucket.value, bucket.reporter
        );
    }

    engine.shutdown().await?;
    Ok(())
}
