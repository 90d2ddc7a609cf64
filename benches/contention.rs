use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use toolshed::engine::{Engine, EngineError};
use toolshed::model::{NewReservation, Span};
use toolshed::notify::NotifyHub;

const HOUR: i64 = 3_600_000;
const T0: i64 = 1_800_000_000_000;

const TOOLS: usize = 8;
const REQUESTERS_PER_TOOL: usize = 32;
const ROUNDS: usize = 20;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

struct Outcome {
    create: Vec<Duration>,
    accept: Vec<Duration>,
    accepted: usize,
    conflicts: usize,
}

/// Every requester asks for an overlapping slot on the same tool, then the
/// owner accepts all of them at once. Exactly one accept per overlap group
/// can win.
async fn contend(engine: Arc<Engine>, tool: Ulid, owner: Ulid, round: usize) -> Outcome {
    let base = T0 + (round as i64) * 24 * HOUR;

    let creates: Vec<_> = (0..REQUESTERS_PER_TOOL)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let start = base + (i % 4) as i64 * HOUR;
                let started = Instant::now();
                let r = engine
                    .create_reservation(NewReservation {
                        id: Ulid::new(),
                        tool_id: tool,
                        requester_id: Ulid::new(),
                        span: Span::new(start, start + 3 * HOUR),
                        contact: String::new(),
                        comment: String::new(),
                    })
                    .await;
                (started.elapsed(), r.map(|r| r.id))
            })
        })
        .collect();

    let mut out = Outcome {
        create: Vec::new(),
        accept: Vec::new(),
        accepted: 0,
        conflicts: 0,
    };
    let mut ids = Vec::new();
    for h in creates {
        let (elapsed, id) = h.await.expect("create task panicked");
        out.create.push(elapsed);
        if let Ok(id) = id {
            ids.push(id);
        }
    }

    let accepts: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let r = engine.accept(id, owner).await;
                (started.elapsed(), r)
            })
        })
        .collect();
    for h in accepts {
        let (elapsed, r) = h.await.expect("accept task panicked");
        out.accept.push(elapsed);
        match r {
            Ok(_) => out.accepted += 1,
            Err(EngineError::DatesConflict(_)) => out.conflicts += 1,
            Err(e) => eprintln!("unexpected accept error: {e}"),
        }
    }
    out
}

fn main() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");

    rt.block_on(async {
        let dir = std::env::temp_dir().join(format!("toolshed_bench_{}", Ulid::new()));
        std::fs::create_dir_all(&dir).expect("bench dir");
        let engine = Arc::new(
            Engine::new(dir.join("bench.wal"), Arc::new(NotifyHub::new())).expect("engine"),
        );

        let owner = Ulid::new();
        let mut tools = Vec::new();
        for i in 0..TOOLS {
            let id = Ulid::new();
            engine
                .register_tool(id, owner, Some(format!("tool {i}")))
                .await
                .expect("register tool");
            tools.push(id);
        }

        println!(
            "contention: {TOOLS} tools x {REQUESTERS_PER_TOOL} requesters x {ROUNDS} rounds"
        );
        let wall = Instant::now();
        let (mut creates, mut accepts) = (Vec::new(), Vec::new());
        let (mut accepted, mut conflicts) = (0, 0);

        for round in 0..ROUNDS {
            let handles: Vec<_> = tools
                .iter()
                .map(|&tool| tokio::spawn(contend(engine.clone(), tool, owner, round)))
                .collect();
            for h in handles {
                let o = h.await.expect("round panicked");
                creates.extend(o.create);
                accepts.extend(o.accept);
                accepted += o.accepted;
                conflicts += o.conflicts;
            }
        }

        let elapsed = wall.elapsed();
        print_latency("create", &mut creates);
        print_latency("accept", &mut accepts);
        println!("  accepted={accepted}, conflicts={conflicts}");
        println!(
            "  total {:.2}s, {:.0} ops/s",
            elapsed.as_secs_f64(),
            (creates.len() + accepts.len()) as f64 / elapsed.as_secs_f64()
        );

        let _ = std::fs::remove_dir_all(&dir);
    });
}
