//! Scripted multi-site portal sessions for the demo binary.

use conclave::{
    extent_of, LocalSessionService, MemoryBus, Point, Portal, PortalClient, Range, SelectionSet,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SessionStats {
    pub label: String,
    pub sites: usize,
    pub edits: usize,
    pub final_text_len: usize,
    pub elapsed: Duration,
}

impl SessionStats {
    pub fn print(&self) {
        println!("\n--- {} ---", self.label);
        println!("  sites:       {}", self.sites);
        println!("  edits:       {}", self.edits);
        println!("  final chars: {}", self.final_text_len);
        println!("  elapsed:     {:?}", self.elapsed);
    }
}

fn new_client(service: &Arc<LocalSessionService>, bus: &Arc<MemoryBus>) -> PortalClient {
    PortalClient::new(service.clone(), bus.clone())
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    while !predicate() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Host and one guest editing the same line concurrently. The classic
/// smoke test: "hello world!" plus an insertion in the middle and a
/// rewrite of the beginning must converge on every site.
pub async fn simulate_pair_session() -> SessionStats {
    let started = Instant::now();
    let service = Arc::new(LocalSessionService::new());
    let bus = Arc::new(MemoryBus::new());

    let host_portal = new_client(&service, &bus).create_portal().await.unwrap();
    let host_buffer = host_portal
        .create_text_buffer("demo.txt", "hello world!")
        .await
        .unwrap();
    let editor = host_portal
        .create_text_editor(&host_buffer, SelectionSet::new())
        .await
        .unwrap();
    host_portal.set_active_text_editor(Some(&editor)).await.unwrap();

    let guest_portal = new_client(&service, &bus)
        .join_portal(host_portal.id())
        .await
        .unwrap();
    let guest_buffer = guest_portal
        .active_text_editor()
        .unwrap()
        .text_buffer()
        .clone();

    host_buffer
        .set_text_in_range(Range::collapsed(Point::new(0, 5)), " cruel")
        .await
        .unwrap();
    guest_buffer
        .set_text_in_range(Range::new(Point::new(0, 0), Point::new(0, 5)), "goodbye")
        .await
        .unwrap();

    wait_until(|| {
        host_buffer.text() == "goodbye cruel world!" && guest_buffer.text() == "goodbye cruel world!"
    })
    .await;
    println!("  converged on: {:?}", host_buffer.text());

    let stats = SessionStats {
        label: "pair session".to_string(),
        sites: 2,
        edits: 2,
        final_text_len: host_buffer.text().chars().count(),
        elapsed: started.elapsed(),
    };
    guest_portal.dispose().await.unwrap();
    host_portal.dispose().await.unwrap();
    stats
}

/// A host and `guests` guests all appending uniquely labelled lines at
/// whatever they currently believe the end of the buffer is.
pub async fn simulate_swarm_session(guests: usize, edits_per_site: usize) -> SessionStats {
    let started = Instant::now();
    let service = Arc::new(LocalSessionService::new());
    let bus = Arc::new(MemoryBus::new());

    let host_portal = new_client(&service, &bus).create_portal().await.unwrap();
    let host_buffer = host_portal.create_text_buffer("log.txt", "").await.unwrap();
    let editor = host_portal
        .create_text_editor(&host_buffer, SelectionSet::new())
        .await
        .unwrap();
    host_portal.set_active_text_editor(Some(&editor)).await.unwrap();

    let mut portals: Vec<Arc<Portal>> = vec![host_portal.clone()];
    for _ in 0..guests {
        let portal = new_client(&service, &bus)
            .join_portal(host_portal.id())
            .await
            .unwrap();
        portals.push(portal);
    }

    let mut edits = 0usize;
    for round in 0..edits_per_site {
        for portal in &portals {
            let buffer = portal.text_buffer("log.txt").expect("replicated buffer");
            let end = extent_of(&buffer.text());
            let line = format!("site {} round {}\n", portal.site_id(), round);
            buffer
                .set_text_in_range(Range::collapsed(end), &line)
                .await
                .unwrap();
            edits += 1;
        }
        // Let the pumps drain between rounds.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let expected_lines = portals.len() * edits_per_site;
    let buffers: Vec<_> = portals
        .iter()
        .map(|portal| portal.text_buffer("log.txt").unwrap())
        .collect();
    wait_until(|| {
        let reference = buffers[0].text();
        reference.lines().count() == expected_lines
            && buffers.iter().all(|buffer| buffer.text() == reference)
    })
    .await;

    let stats = SessionStats {
        label: "swarm session".to_string(),
        sites: portals.len(),
        edits,
        final_text_len: buffers[0].text().chars().count(),
        elapsed: started.elapsed(),
    };
    for portal in portals.iter().rev() {
        portal.dispose().await.unwrap();
    }
    stats
}
