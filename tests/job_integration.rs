//! Asynchronous job integration tests.

#[allow(dead_code)]
mod common;

use common::*;
use modelforge::scheduling::{JobQueue, WorkerPool};
use modelforge::shutdown::ShutdownCoordinator;
use serde_json::{json, Value};
use std::time::Duration;

async fn status_is(server: &TestServer, job_id: &str, expected: &str) -> AssertionResult {
    let status = server.job_status(job_id).await;
    if status == expected {
        AssertionResult::pass()
    } else {
        AssertionResult::fail("Job status mismatch")
            .with_expected(expected)
            .with_actual(status)
    }
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn test_job_runs_to_completion() {
    let server = TestServer::start().await;
    let id = server.ready_model("iris").await;

    let job = server.submit_job(&id, iris_input(IRIS_SAMPLES[1].0)).await;
    assert_eq!(job["status"], "queued");
    assert!(job["task_id"].as_str().is_some());
    let job_id = job["id"].as_str().unwrap();

    let (status, result) = server
        .get_json(server.api(&format!("/jobs/{}/result?wait=5", job_id)))
        .await;
    assert_eq!(status, 200);
    assert_eq!(result["status"], "completed");
    assert_eq!(result["result"]["label"], json!([1]));
    assert!(result["inference_time_ms"].as_f64().is_some());
    assert!(result["completed_at"].as_str().is_some());

    let (_, job) = server.get_json(server.api(&format!("/jobs/{}", job_id))).await;
    assert_eq!(job["retries"], 0);
    assert!(job["worker_id"].as_str().is_some());
    assert!(job["started_at"].as_str().is_some());
    assert!(job["queue_time_ms"].as_f64().is_some());
}

#[tokio::test]
async fn test_bad_input_fails_without_retry() {
    let server = TestServer::start().await;
    let id = server.ready_model("iris").await;

    let job = server.submit_job(&id, json!({ "features": [[1.0]] })).await;
    let job_id = job["id"].as_str().unwrap();

    let (status, result) = server
        .get_json(server.api(&format!("/jobs/{}/result?wait=5", job_id)))
        .await;
    assert_eq!(status, 200);
    assert_eq!(result["status"], "failed");
    assert!(result["error_message"].as_str().is_some());
    let traceback = result["error_traceback"].as_str().unwrap();
    assert!(traceback.starts_with("attempt 1:"));

    let (_, job) = server.get_json(server.api(&format!("/jobs/{}", job_id))).await;
    assert_eq!(job["retries"], 0);
}

#[tokio::test]
async fn test_submit_requires_committed_model() {
    let server = TestServer::start().await;
    let model = server.create_model("iris", "1.0.0").await;

    let response = server
        .client
        .post(server.api("/jobs"))
        .json(&json!({ "model_id": model["id"], "input_data": iris_input(IRIS_SAMPLES[0].0) }))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap();
    assert_error(status, &body, 400, "not_committed").assert();
}

#[tokio::test]
async fn test_many_jobs_all_finish() {
    let server = TestServer::start().await;
    let id = server.ready_model("iris").await;

    let mut generator = TestDataGenerator::new(7);
    let mut job_ids = Vec::new();
    for _ in 0..10 {
        let job = server.submit_job(&id, iris_input(generator.iris_row())).await;
        job_ids.push(job["id"].as_str().unwrap().to_string());
    }

    let server = &server;
    for job_id in &job_ids {
        assert_eventually(
            move || status_is(server, job_id, "completed"),
            Duration::from_secs(5),
            Duration::from_millis(20),
        )
        .await
        .assert();
    }

    let (_, page) = server
        .get_json(server.api(&format!("/jobs?status=completed&model_id={}", id)))
        .await;
    assert_eq!(page["total"], 10);
}

// ============================================================================
// Pending jobs and cancellation
// ============================================================================

#[tokio::test]
async fn test_result_of_queued_job_is_still_processing() {
    let server = TestServer::start_without_workers().await;
    let id = server.ready_model("iris").await;
    let job = server.submit_job(&id, iris_input(IRIS_SAMPLES[0].0)).await;
    let job_id = job["id"].as_str().unwrap();

    let (status, result) = server
        .get_json(server.api(&format!("/jobs/{}/result", job_id)))
        .await;
    assert_eq!(status, 200);
    assert_eq!(result["status"], "queued");
    assert_eq!(result["message"], "Job is still processing");
    assert_eq!(result["result"], Value::Null);
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let server = TestServer::start_without_workers().await;
    let id = server.ready_model("iris").await;
    let job = server.submit_job(&id, iris_input(IRIS_SAMPLES[0].0)).await;
    let job_id = job["id"].as_str().unwrap();
    let cancel_url = server.api(&format!("/jobs/{}/cancel", job_id));

    let response = server.client.post(&cancel_url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");
    assert!(body["completed_at"].as_str().is_some());

    let response = server.client.post(&cancel_url).send().await.unwrap();
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap();
    assert_error(status, &body, 409, "already_terminal").assert();

    let (_, result) = server
        .get_json(server.api(&format!("/jobs/{}/result", job_id)))
        .await;
    assert_eq!(result["status"], "cancelled");
    assert_eq!(result["message"], "Job was cancelled");
}

#[tokio::test]
async fn test_cancelled_job_is_skipped_by_workers() {
    let server = TestServer::start_without_workers().await;
    let id = server.ready_model("iris").await;
    let job = server.submit_job(&id, iris_input(IRIS_SAMPLES[0].0)).await;
    let job_id = job["id"].as_str().unwrap();
    server
        .client
        .post(server.api(&format!("/jobs/{}/cancel", job_id)))
        .send()
        .await
        .unwrap();

    // Start workers late; the dequeued task must not resurrect the job.
    let shutdown = ShutdownCoordinator::new();
    let pool = WorkerPool::spawn(server.services.jobs.clone(), 1, &shutdown);
    let queue = server.services.queue.clone();
    assert_eventually(
        move || {
            let depth = queue.depth();
            async move {
                if depth == 0 {
                    AssertionResult::pass()
                } else {
                    AssertionResult::fail("Queue not drained").with_actual(depth.to_string())
                }
            }
        },
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .await
    .assert();
    tokio::time::sleep(Duration::from_millis(50)).await;
    status_is(&server, job_id, "cancelled").await.assert();

    shutdown.shutdown();
    pool.join().await;
}

#[tokio::test]
async fn test_delete_job_requires_terminal_state() {
    let server = TestServer::start_without_workers().await;
    let id = server.ready_model("iris").await;
    let job = server.submit_job(&id, iris_input(IRIS_SAMPLES[0].0)).await;
    let job_id = job["id"].as_str().unwrap();
    let job_url = server.api(&format!("/jobs/{}", job_id));

    let response = server.client.delete(&job_url).send().await.unwrap();
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap();
    assert_error(status, &body, 400, "invalid_state").assert();

    server
        .client
        .post(server.api(&format!("/jobs/{}/cancel", job_id)))
        .send()
        .await
        .unwrap();
    let response = server.client.delete(&job_url).send().await.unwrap();
    assert_eq!(response.status(), 204);

    let (status, body) = server.get_json(job_url).await;
    assert_error(status, &body, 404, "not_found").assert();
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_retention_sweeps_only_old_terminal_jobs() {
    let server = TestServer::start_without_workers().await;
    let id = server.ready_model("iris").await;

    let finished = server.submit_job(&id, iris_input(IRIS_SAMPLES[0].0)).await;
    let finished_id = finished["id"].as_str().unwrap();
    server
        .client
        .post(server.api(&format!("/jobs/{}/cancel", finished_id)))
        .send()
        .await
        .unwrap();
    let waiting = server.submit_job(&id, iris_input(IRIS_SAMPLES[1].0)).await;
    let waiting_id = waiting["id"].as_str().unwrap();

    let jobs = &server.services.jobs;
    assert_eq!(jobs.run_retention_sweep(chrono::Utc::now()).await.unwrap(), 0);

    let later = chrono::Utc::now() + chrono::Duration::days(2);
    assert_eq!(jobs.run_retention_sweep(later).await.unwrap(), 1);

    let (status, _) = server.get_json(server.api(&format!("/jobs/{}", finished_id))).await;
    assert_eq!(status, 404);
    status_is(&server, waiting_id, "queued").await.assert();
}
