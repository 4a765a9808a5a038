mod assistants;
mod classrooms;
mod domain;
mod error;
mod mip;
mod server;
mod store;
mod timetable;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    server::run_server().await;
}
