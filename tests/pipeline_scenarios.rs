//! 端到端流水线场景：通过 `App` 提交任务，用假能力驱动各阶段

mod common;

use std::sync::atomic::Ordering;
use tokio_test::{assert_err, assert_ok};

use common::*;
use compliance_orchestrator::models::framework::FrameworkIdentity;
use compliance_orchestrator::models::job::Stage;
use compliance_orchestrator::{DocumentRef, ErrorKind, JobStatus};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_compliant_statement_completes_without_gap() {
    let h = harness(test_config(2, 20), ScriptedOracle::constant(0.9), true);
    let id = assert_ok!(h.app.submit_job(
        input_doc(&["[Permits] A valid mining permit is displayed at the site entrance"]),
        vec![framework_doc("drc", PERMIT_FRAMEWORK)],
        no_metadata(),
    ));

    let view = wait_terminal(&h.app, &id).await;
    assert_eq!(view.status, JobStatus::Complete);
    assert_eq!(view.progress, 100);
    assert_eq!(view.completed_stages, Stage::ALL.to_vec());
    assert!(view.error_summary.is_none());

    let report = assert_ok!(h.app.get_job_result(&id));
    assert_eq!(report.items.len(), 1);
    let item = &report.items[0];
    assert!(approx(item.score, 0.9));
    assert!(!item.gap);
    assert_eq!(item.penalty, 0.0);
    assert_eq!(item.matched_statement.as_ref().map(|s| s.index), Some(0));

    let score = report.framework_score("DRC Mining Code").expect("framework score");
    assert!(approx(score.score, 0.9));
    assert_eq!(report.total_exposure, 0.0);
    assert!(!report.summary_is_fallback);
}

#[tokio::test]
async fn test_weak_statement_produces_weighted_penalty() {
    let h = harness(test_config(2, 20), ScriptedOracle::constant(0.4), true);
    let id = h
        .app
        .submit_job(
            input_doc(&["[Permits] Permit renewal was filed last year"]),
            vec![framework_doc("drc", PERMIT_FRAMEWORK)],
            no_metadata(),
        )
        .unwrap();

    assert_eq!(wait_terminal(&h.app, &id).await.status, JobStatus::Complete);
    let report = h.app.get_job_result(&id).unwrap();
    let item = &report.items[0];
    assert!(item.gap);
    // 3.0 × 1000 × (1 − 0.4)
    assert!(approx(item.penalty, 1800.0));
    assert!(approx(report.total_exposure, 1800.0));
    assert!(approx(report.penalty_by_framework["DRC Mining Code"], 1800.0));
    assert_eq!(report.critical_recommendations.len(), 1);
    assert!(report.critical_recommendations[0].starts_with("[DRC Mining Code] Permits"));
}

#[tokio::test]
async fn test_missing_category_is_full_gap_without_oracle_calls() {
    let h = harness(test_config(2, 20), ScriptedOracle::constant(1.0), true);
    let id = h
        .app
        .submit_job(
            input_doc(&["[Safety] Helmets are worn underground"]),
            vec![framework_doc("drc", PERMIT_FRAMEWORK)],
            no_metadata(),
        )
        .unwrap();

    assert_eq!(wait_terminal(&h.app, &id).await.status, JobStatus::Complete);
    let report = h.app.get_job_result(&id).unwrap();
    let item = &report.items[0];
    assert_eq!(item.score, 0.0);
    assert!(item.gap);
    assert!(item.matched_statement.is_none());
    assert!(approx(item.penalty, 3000.0));
    assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 0);
}

fn ten_statements() -> Vec<String> {
    (0..10).map(|i| format!("[C{i}] s{i}")).collect()
}

#[tokio::test]
async fn test_single_degraded_pairing_stays_under_ceiling() {
    let scores: Vec<(String, f64)> = (0..10)
        .filter(|i| *i != 3)
        .map(|i| (format!("s{i}"), 0.9))
        .collect();
    let scores: Vec<(&str, f64)> = scores.iter().map(|(s, v)| (s.as_str(), *v)).collect();
    let h = harness(test_config(2, 20), ScriptedOracle::new(&scores), true);

    let lines = ten_statements();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    let id = h
        .app
        .submit_job(
            input_doc(&lines),
            vec![framework_doc("ten", &ten_clause_framework())],
            no_metadata(),
        )
        .unwrap();

    assert_eq!(wait_terminal(&h.app, &id).await.status, JobStatus::Complete);
    let report = h.app.get_job_result(&id).unwrap();
    assert_eq!(report.items.len(), 10);
    assert_eq!(report.findings.degraded, 1);

    let degraded: Vec<_> = report.items.iter().filter(|i| i.degraded).collect();
    assert_eq!(degraded[0].clause.category, "C3");
    assert!(degraded[0].gap);
    // 9 次成功 + s3 重试 3 次
    assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn test_failed_candidate_degrades_clause_despite_other_match() {
    let scores: Vec<(String, f64)> = (0..10).map(|i| (format!("s{i}"), 0.9)).collect();
    let scores: Vec<(&str, f64)> = scores.iter().map(|(s, v)| (s.as_str(), *v)).collect();
    let h = harness(test_config(2, 20), ScriptedOracle::new(&scores), true);

    // C0 有两条候选：s0 打分成功，flaky 永远失败
    let mut lines = ten_statements();
    lines.push("[C0] flaky".to_string());
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    let id = h
        .app
        .submit_job(
            input_doc(&lines),
            vec![framework_doc("ten", &ten_clause_framework())],
            no_metadata(),
        )
        .unwrap();

    assert_eq!(wait_terminal(&h.app, &id).await.status, JobStatus::Complete);
    let report = h.app.get_job_result(&id).unwrap();
    assert_eq!(report.findings.degraded, 1);

    let item = report.items.iter().find(|i| i.clause.category == "C0").unwrap();
    assert!(item.degraded);
    assert_eq!(item.score, 0.0);
    assert!(item.gap);
    assert_eq!(item.matched_statement.as_ref().map(|s| s.text.as_str()), Some("flaky"));
    // 10 次成功 + flaky 重试 3 次
    assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 13);
}

#[tokio::test]
async fn test_same_name_frameworks_are_scored_separately() {
    let h = harness(test_config(2, 20), ScriptedOracle::constant(0.7), true);
    let strict = PERMIT_FRAMEWORK.replace("gap_threshold = 0.6", "gap_threshold = 0.8");
    let id = h
        .app
        .submit_job(
            input_doc(&["[Permits] Permit is displayed but renewal is overdue"]),
            vec![
                framework_doc("drc-2023", PERMIT_FRAMEWORK),
                framework_doc("drc-2024", &strict),
                // 内容相同、文件名不同：同一个框架
                framework_doc("drc-copy", PERMIT_FRAMEWORK),
            ],
            no_metadata(),
        )
        .unwrap();

    assert_eq!(wait_terminal(&h.app, &id).await.status, JobStatus::Complete);
    let report = h.app.get_job_result(&id).unwrap();
    assert_eq!(h.parser.calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.framework_scores.len(), 2);
    assert_eq!(report.items.len(), 2);

    let lenient_id = FrameworkIdentity::from_content(PERMIT_FRAMEWORK.as_bytes());
    let strict_id = FrameworkIdentity::from_content(strict.as_bytes());
    let lenient = report.framework_scores.iter().find(|s| s.framework_id == lenient_id).unwrap();
    let strict_score = report.framework_scores.iter().find(|s| s.framework_id == strict_id).unwrap();
    assert_ne!(lenient.framework, strict_score.framework);
    assert!(lenient.framework.starts_with("DRC Mining Code"));
    assert!(strict_score.framework.starts_with("DRC Mining Code"));
    assert_eq!(lenient.gap_count, 0);
    assert_eq!(strict_score.gap_count, 1);

    // 3.0 × 1000 × (1 − 0.7)，只来自阈值 0.8 的版本
    assert_eq!(report.penalty_by_framework.len(), 2);
    assert!(approx(report.penalty_by_framework[&lenient.framework], 0.0));
    assert!(approx(report.penalty_by_framework[&strict_score.framework], 900.0));
    assert!(approx(report.total_exposure, 900.0));
}

#[tokio::test]
async fn test_degradation_above_ceiling_fails_at_compare() {
    let scores: Vec<(String, f64)> = (3..10).map(|i| (format!("s{i}"), 0.9)).collect();
    let scores: Vec<(&str, f64)> = scores.iter().map(|(s, v)| (s.as_str(), *v)).collect();
    let h = harness(test_config(2, 20), ScriptedOracle::new(&scores), true);

    let lines = ten_statements();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    let id = h
        .app
        .submit_job(
            input_doc(&lines),
            vec![framework_doc("ten", &ten_clause_framework())],
            no_metadata(),
        )
        .unwrap();

    let view = wait_terminal(&h.app, &id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.completed_stages, vec![Stage::Extract, Stage::LoadFrameworks]);
    let summary = view.error_summary.expect("error summary");
    assert!(summary.starts_with("[ORACLE_UNAVAILABLE @ Compare]"), "{}", summary);

    let err = assert_err!(h.app.get_job_result(&id));
    assert_eq!(err.kind(), ErrorKind::NotReady);
}

#[tokio::test]
async fn test_queue_saturation_rejects_overflow() {
    // current_thread：提交循环中工作者没有机会运行，队列只能装下 20 个
    let h = harness(test_config(5, 20), ScriptedOracle::constant(0.9), false);

    let mut accepted = Vec::new();
    let mut saturated = 0;
    for i in 0..50 {
        match h.app.submit_job(
            input_doc(&[format!("[Permits] permit {i}").as_str()]),
            vec![framework_doc("drc", PERMIT_FRAMEWORK)],
            no_metadata(),
        ) {
            Ok(id) => accepted.push(id),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::Saturated);
                saturated += 1;
            }
        }
    }
    assert_eq!(accepted.len(), 20);
    assert_eq!(saturated, 30);
    // 被拒绝的提交不创建任务
    assert_eq!(h.app.list_jobs().len(), 20);

    h.gate.send(true).unwrap();
    for id in &accepted {
        assert_eq!(wait_terminal(&h.app, id).await.status, JobStatus::Complete);
    }
    // 同一份框架只解析一次
    assert_eq!(h.parser.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_pending_and_running_jobs() {
    let h = harness(test_config(1, 20), ScriptedOracle::constant(0.9), false);

    let running = h
        .app
        .submit_job(
            input_doc(&["[Permits] first"]),
            vec![framework_doc("drc", PERMIT_FRAMEWORK)],
            no_metadata(),
        )
        .unwrap();
    wait_running(&h.app, &running).await;

    // 唯一的工作者被占用，第二个任务停留在 Pending
    let queued = h
        .app
        .submit_job(
            input_doc(&["[Permits] second"]),
            vec![framework_doc("drc", PERMIT_FRAMEWORK)],
            no_metadata(),
        )
        .unwrap();
    assert_eq!(h.app.cancel_job(&queued).unwrap(), JobStatus::Cancelled);
    assert_eq!(h.app.cancel_job(&running).unwrap(), JobStatus::Running);

    h.gate.send(true).unwrap();

    let view = wait_terminal(&h.app, &running).await;
    assert_eq!(view.status, JobStatus::Cancelled);
    // 抽取阶段完成后在边界处停下
    assert_eq!(view.completed_stages, vec![Stage::Extract]);
    assert!(view.error_summary.is_none());

    let queued_view = wait_terminal(&h.app, &queued).await;
    assert_eq!(queued_view.status, JobStatus::Cancelled);
    assert!(queued_view.completed_stages.is_empty());

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.app.get_job_result(&running).unwrap_err().kind(),
        ErrorKind::NotReady
    );
    // 终态任务再次取消不改变状态
    assert_eq!(h.app.cancel_job(&running).unwrap(), JobStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_framework_loaded_once_across_jobs() {
    let h = harness(test_config(5, 20), ScriptedOracle::constant(0.7), true);

    let mut ids = Vec::new();
    for i in 0..5 {
        // 文件名不同，内容相同
        let framework = framework_doc(&format!("copy-{i}"), PERMIT_FRAMEWORK);
        ids.push(
            h.app
                .submit_job(input_doc(&["[Permits] permit"]), vec![framework], no_metadata())
                .unwrap(),
        );
    }
    for id in &ids {
        assert_eq!(wait_terminal(&h.app, id).await.status, JobStatus::Complete);
    }

    assert_eq!(h.parser.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.app.framework_cache().loads_started(), 1);
    assert_eq!(h.app.framework_cache().cached_count(), 1);
}

#[tokio::test]
async fn test_unsupported_input_fails_without_retry() {
    let h = harness(test_config(2, 20), ScriptedOracle::constant(0.9), true);
    let input = DocumentRef::new("site-audio.mp3", vec![0xFF, 0xFB, 0x90], "audio/mpeg");
    let id = h
        .app
        .submit_job(input, vec![framework_doc("drc", PERMIT_FRAMEWORK)], no_metadata())
        .unwrap();

    let view = wait_terminal(&h.app, &id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert!(view.completed_stages.is_empty());
    assert!(view
        .error_summary
        .unwrap()
        .starts_with("[UNSUPPORTED_FORMAT @ Extract]"));
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_malformed_framework_fails_and_is_not_cached() {
    let h = harness(test_config(2, 20), ScriptedOracle::constant(0.9), true);
    let broken = framework_doc("broken", "name = = \"not toml\"");
    let id = h
        .app
        .submit_job(input_doc(&["[Permits] permit"]), vec![broken], no_metadata())
        .unwrap();

    let view = wait_terminal(&h.app, &id).await;
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.completed_stages, vec![Stage::Extract]);
    assert!(view
        .error_summary
        .unwrap()
        .starts_with("[FRAMEWORK_LOAD_FAILED @ LoadFrameworks]"));
    assert_eq!(h.app.framework_cache().cached_count(), 0);

    // 后续任务不受影响
    let ok = h
        .app
        .submit_job(
            input_doc(&["[Permits] permit"]),
            vec![framework_doc("drc", PERMIT_FRAMEWORK)],
            no_metadata(),
        )
        .unwrap();
    assert_eq!(wait_terminal(&h.app, &ok).await.status, JobStatus::Complete);
}

#[tokio::test]
async fn test_summary_failure_falls_back_to_template() {
    let h = harness_with(test_config(2, 20), ScriptedOracle::constant(0.4), true, true);
    let id = h
        .app
        .submit_job(
            input_doc(&["[Permits] permit pending"]),
            vec![framework_doc("drc", PERMIT_FRAMEWORK)],
            no_metadata(),
        )
        .unwrap();

    assert_eq!(wait_terminal(&h.app, &id).await.status, JobStatus::Complete);
    let report = h.app.get_job_result(&id).unwrap();
    assert!(report.summary_is_fallback);
    assert!(report.executive_summary.contains("$1,800.00"));
}

#[tokio::test]
async fn test_invalid_submissions_create_no_job() {
    let h = harness(test_config(2, 20), ScriptedOracle::constant(0.9), true);

    let err = h
        .app
        .submit_job(input_doc(&["[Permits] permit"]), Vec::new(), no_metadata())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let empty_input = DocumentRef::new("empty.txt", Vec::new(), "text/plain");
    let err = h
        .app
        .submit_job(empty_input, vec![framework_doc("drc", PERMIT_FRAMEWORK)], no_metadata())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(h.app.list_jobs().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness(test_config(1, 5), ScriptedOracle::constant(0.9), true);
    let unknown = compliance_orchestrator::JobId::new();
    assert_eq!(
        h.app.get_job_status(&unknown).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(h.app.cancel_job(&unknown).unwrap_err().kind(), ErrorKind::NotFound);
}
