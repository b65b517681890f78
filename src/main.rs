use simulation::{simulate_pair_session, simulate_swarm_session};
pub mod simulation;

fn main() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            PORTAL SESSION DEMO                             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Scenario 1: two sites, concurrent edits on one line
    let stats = simulate_pair_session().await;
    stats.print();

    // Scenario 2: a host and four guests appending concurrently
    let stats = simulate_swarm_session(4, 25).await;
    stats.print();

    println!("\n✓ All sessions converged successfully!");
}
