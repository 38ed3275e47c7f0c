use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

const HOUR: i64 = 3600;

fn at(hours: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + hours * HOUR, 0).unwrap()
}

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

struct Target {
    base: String,
    client: Client,
}

impl Target {
    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .expect("request failed");
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn create(&self, path: &str, body: Value) -> String {
        let (status, body) = self.post(path, body).await;
        assert_eq!(status, StatusCode::CREATED, "{path}: {body}");
        body["id"].as_str().expect("id in response").to_string()
    }

    async fn reserve(&self, patient: &str, bed: &str, start: i64, hours: i64) -> StatusCode {
        self.post(
            "/reservations",
            json!({
                "patientId": patient,
                "bedId": bed,
                "startDate": at(start),
                "endDate": at(start + hours),
            }),
        )
        .await
        .0
    }
}

struct Ward {
    patient: String,
    beds: Vec<String>,
}

async fn setup(target: &Target, n_beds: usize) -> Ward {
    let establishment = target
        .create("/establishments", json!({ "name": "Bench hospital" }))
        .await;
    let service = target
        .create(
            "/services",
            json!({ "name": format!("Bench {}", ulid::Ulid::new()), "establishmentId": establishment }),
        )
        .await;
    let mut beds = Vec::with_capacity(n_beds);
    for i in 0..n_beds {
        beds.push(
            target
                .create("/beds", json!({ "number": format!("B-{i}"), "serviceId": service }))
                .await,
        );
    }
    let patient = target
        .create("/patients", json!({ "lastName": "Bench", "firstName": "Mark" }))
        .await;
    println!("  created {} beds", beds.len());
    Ward { patient, beds }
}

async fn phase1_sequential(target: &Target, ward: &Ward) {
    let n = 1000;
    let bed = &ward.beds[0];
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        // one hour gap keeps every window disjoint
        let status = target.reserve(&ward.patient, bed, (i as i64) * 2, 1).await;
        assert_eq!(status, StatusCode::CREATED);
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_beds(target: &Arc<Target>, ward: &Arc<Ward>) {
    let n_tasks = ward.beds.len() - 1;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let target = target.clone();
        let ward = ward.clone();
        handles.push(tokio::spawn(async move {
            let bed = &ward.beds[i + 1];
            for j in 0..n_per_task {
                let status = target.reserve(&ward.patient, bed, (j as i64) * 2, 1).await;
                assert_eq!(status, StatusCode::CREATED);
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} beds x {n_per_task} reservations = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many writers racing for the same windows on one bed: exactly one wins each slot.
async fn phase3_contention(target: &Arc<Target>, ward: &Arc<Ward>) {
    let n_writers = 20;
    let n_slots = 50;
    let created = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_writers {
        let target = target.clone();
        let ward = ward.clone();
        let created = created.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_slots);
            for slot in 0..n_slots {
                let t = Instant::now();
                // far past phase 1's windows on the same bed
                let status = target
                    .reserve(&ward.patient, &ward.beds[0], 100_000 + slot as i64 * 10, 5)
                    .await;
                latencies.push(t.elapsed());
                match status {
                    StatusCode::CREATED => created.fetch_add(1, Ordering::Relaxed),
                    _ => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }

    let elapsed = start.elapsed();
    let created = created.load(Ordering::Relaxed);
    let rejected = rejected.load(Ordering::Relaxed);
    println!(
        "  {n_writers} writers x {n_slots} slots: {created} created, {rejected} rejected in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(created, n_slots, "each slot must be won exactly once");
    print_latency("contended write latency", &mut all_latencies);
}

async fn phase4_availability_reads(target: &Arc<Target>, ward: &Arc<Ward>) {
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut handles = Vec::new();

    for r in 0..n_readers {
        let target = target.clone();
        let ward = ward.clone();
        handles.push(tokio::spawn(async move {
            let bed = &ward.beds[r % ward.beds.len()];
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let url = format!("{}/beds/{bed}/availability", target.base);
                let t = Instant::now();
                target
                    .client
                    .get(url)
                    .query(&[
                        ("start", at(i as i64).to_rfc3339()),
                        ("end", at(i as i64 + 3).to_rfc3339()),
                    ])
                    .send()
                    .await
                    .expect("request failed");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }
    print_latency("availability query", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let base = std::env::var("SILBO_URL").unwrap_or_else(|_| "http://127.0.0.1:3000".into());

    println!("=== silbo stress benchmark ===");
    println!("target: {base}\n");

    let target = Arc::new(Target {
        base,
        client: Client::new(),
    });

    println!("[setup]");
    let ward = Arc::new(setup(&target, 11).await);

    println!("\n[phase 1] sequential reservation throughput");
    phase1_sequential(&target, &ward).await;

    println!("\n[phase 2] concurrent reservations on distinct beds");
    phase2_concurrent_beds(&target, &ward).await;

    println!("\n[phase 3] contention on a single bed");
    phase3_contention(&target, &ward).await;

    println!("\n[phase 4] availability read latency");
    phase4_availability_reads(&target, &ward).await;

    println!("\n=== done ===");
}
