mod ai;
mod app;
mod context;
mod crm;
mod escalation;
mod handoff;
mod kb;
mod notifier;
mod orchestrator;
mod prompting;
mod store;
mod tracker;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
