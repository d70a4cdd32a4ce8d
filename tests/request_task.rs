//! Lifecycle tests for request tasks driven through a scripted transport

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::{CallLog, MockTransport, response_for};
use urltask::http::StatusCode;
use urltask::{
    CachedResponse, Direction, Error, ErrorKind, Observers, Request, RequestTask, ResumeData,
    TaskOptions, TaskState, Transport,
};

const URL: &str = "https://example.com/files/report.json";

fn get() -> Request {
    Request::get(URL).unwrap().build()
}

/// Observers that write every call into `log`
fn logging_observers(log: &CallLog) -> Observers {
    let response = log.clone();
    let upload = log.clone();
    let download = log.clone();
    let completion = log.clone();
    Observers::new()
        .on_response(move |metadata| response.push(format!("response:{}", metadata.status().as_u16())))
        .on_upload_progress(move |fraction| upload.push(format!("upload:{:?}", fraction)))
        .on_download_progress(move |fraction| download.push(format!("download:{:?}", fraction)))
        .on_completion(move |result| match result {
            Ok(data) => completion.push(format!("complete:ok:{}", data.len())),
            Err(error) => completion.push(format!("complete:err:{}", error)),
        })
}

fn send(transport: &Arc<MockTransport>, request: Request, log: &CallLog) -> RequestTask {
    RequestTask::send(transport.clone(), request, logging_observers(log))
}

#[test]
fn test_successful_request_reports_in_order() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    assert_eq!(task.state(), TaskState::Running);
    assert_eq!(transport.submit_count(), 1);
    assert!(task.task().is_some());

    let events = transport.events(0);
    events.on_response(response_for(URL, StatusCode::OK, Some(10)));
    events.on_data(Bytes::from_static(b"01234"));
    events.on_progress(Direction::Download, 5, Some(10));
    events.on_data(Bytes::from_static(b"56789"));
    events.on_progress(Direction::Download, 10, Some(10));
    events.on_complete(Ok(()));

    assert_eq!(
        log.entries(),
        vec![
            "response:200",
            "download:Some(0.5)",
            "download:Some(1.0)",
            "complete:ok:10",
        ]
    );
    assert_eq!(task.state(), TaskState::Succeeded);
    assert_eq!(task.response_data().unwrap(), Bytes::from_static(b"0123456789"));
    assert!(task.error().is_none());
    assert_eq!(task.response().unwrap().expected_content_length(), Some(10));
    assert_eq!(task.download_progress(), 1.0);
    assert_eq!(task.upload_progress(), 1.0);
}

#[test]
fn test_start_twice_submits_once() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = RequestTask::new(
        transport.clone(),
        get(),
        TaskOptions::default(),
        logging_observers(&log),
    )
    .unwrap();

    assert_eq!(task.state(), TaskState::Created);
    assert_eq!(transport.submit_count(), 0);

    task.start().unwrap();
    assert!(matches!(task.start(), Err(Error::AlreadyStarted)));
    assert_eq!(transport.submit_count(), 1);

    transport.events(0).on_complete(Ok(()));
    assert!(matches!(task.start(), Err(Error::AlreadyStarted)));
    assert_eq!(transport.submit_count(), 1);
    assert_eq!(log.count("complete:"), 1);
}

#[test]
fn test_failure_has_error_and_no_data() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    let events = transport.events(0);
    events.on_response(response_for(URL, StatusCode::OK, Some(100)));
    events.on_data(Bytes::from_static(b"partial"));
    events.on_complete(Err(Error::Network {
        code: -1005,
        message: "connection lost".to_string(),
    }));

    assert_eq!(task.state(), TaskState::Failed);
    assert!(task.response_data().is_none());
    assert_eq!(task.error().unwrap().kind(), ErrorKind::TransportFailure);
    assert_eq!(log.count("complete:err"), 1);
    assert_eq!(log.count("complete:ok"), 0);
}

#[test]
fn test_failure_before_headers_skips_response_observer() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    transport.events(0).on_complete(Err(Error::Timeout));

    assert_eq!(log.count("response:"), 0);
    assert_eq!(log.count("complete:err"), 1);
    assert!(task.response().is_none());
    assert!(matches!(task.error(), Some(Error::Timeout)));
}

#[test]
fn test_progress_is_monotonic_and_bounded() {
    let transport = MockTransport::new();
    let fractions = Arc::new(Mutex::new(Vec::new()));
    let seen = fractions.clone();
    let _task = RequestTask::send(
        transport.clone(),
        get(),
        Observers::new().on_download_progress(move |fraction| seen.lock().unwrap().push(fraction)),
    );

    let events = transport.events(0);
    events.on_progress(Direction::Download, 30, Some(100));
    events.on_progress(Direction::Download, 20, Some(100));
    events.on_progress(Direction::Download, 30, Some(100));
    events.on_progress(Direction::Download, 40, Some(1000));
    events.on_progress(Direction::Download, 500, Some(100));
    events.on_complete(Ok(()));

    let fractions = fractions.lock().unwrap().clone();
    assert_eq!(fractions, vec![Some(0.3), Some(0.3), Some(1.0)]);
    let known: Vec<f64> = fractions.into_iter().flatten().collect();
    assert!(known.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(known.iter().all(|fraction| (0.0..=1.0).contains(fraction)));
}

#[test]
fn test_unknown_total_reports_indeterminate_progress() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    let events = transport.events(0);
    events.on_progress(Direction::Download, 512, None);
    events.on_progress(Direction::Download, 1024, None);

    assert_eq!(log.entries(), vec!["download:None", "download:None"]);
    assert_eq!(task.download_progress(), 0.0);
}

#[test]
fn test_upload_progress_is_reported_separately() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let request = Request::post(URL).unwrap().text("hello world").build();
    let task = send(&transport, request, &log);

    let events = transport.events(0);
    events.on_progress(Direction::Upload, 6, Some(11));
    events.on_progress(Direction::Upload, 11, Some(11));
    events.on_response(response_for(URL, StatusCode::CREATED, Some(0)));
    events.on_complete(Ok(()));

    assert_eq!(log.count("upload:"), 2);
    assert_eq!(log.count("download:"), 0);
    assert_eq!(task.upload_progress(), 1.0);
    assert_eq!(log.entries().last().unwrap(), "complete:ok:0");
}

#[test]
fn test_cancel_before_network_activity() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    task.cancel();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(transport.cancel_count(), 1);
    assert!(matches!(task.error(), Some(Error::Cancelled)));
    assert_eq!(log.entries(), vec![format!("complete:err:{}", Error::Cancelled)]);

    // Late transport events are ignored.
    let events = transport.events(0);
    events.on_response(response_for(URL, StatusCode::OK, Some(4)));
    events.on_data(Bytes::from_static(b"late"));
    events.on_progress(Direction::Download, 4, Some(4));
    events.on_complete(Ok(()));

    assert_eq!(log.entries().len(), 1);
    assert!(task.response().is_none());
    assert!(task.response_data().is_none());
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[test]
fn test_cancel_twice_reports_once() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    task.cancel();
    task.cancel();

    assert_eq!(log.count("complete:"), 1);
    assert_eq!(transport.cancel_count(), 1);
}

#[test]
fn test_cancel_after_completion_is_noop() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    let events = transport.events(0);
    events.on_data(Bytes::from_static(b"done"));
    events.on_complete(Ok(()));
    task.cancel();

    assert_eq!(task.state(), TaskState::Succeeded);
    assert_eq!(task.response_data().unwrap(), Bytes::from_static(b"done"));
    assert_eq!(transport.cancel_count(), 0);
    assert_eq!(log.entries(), vec!["complete:ok:4"]);
}

#[test]
fn test_cancel_unstarted_task() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = RequestTask::new(
        transport.clone(),
        get(),
        TaskOptions::default(),
        logging_observers(&log),
    )
    .unwrap();

    task.cancel();
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(log.count("complete:err"), 1);

    assert!(matches!(task.start(), Err(Error::AlreadyStarted)));
    assert_eq!(transport.submit_count(), 0);
    assert_eq!(transport.cancel_count(), 0);
}

#[test]
fn test_cancel_from_progress_observer() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let slot: Arc<Mutex<Option<RequestTask>>> = Arc::new(Mutex::new(None));

    let cancel_slot = slot.clone();
    let progress_log = log.clone();
    let completion_log = log.clone();
    let task = RequestTask::builder(transport.clone(), get())
        .on_download_progress(move |fraction| {
            progress_log.push(format!("download:{:?}", fraction));
            let task = cancel_slot.lock().unwrap().clone();
            if let Some(task) = task {
                task.cancel();
            }
        })
        .on_completion(move |result| {
            completion_log.push(format!("complete:{}", result.is_ok()));
        })
        .build()
        .unwrap();
    *slot.lock().unwrap() = Some(task.clone());
    task.start().unwrap();

    let events = transport.events(0);
    events.on_progress(Direction::Download, 10, Some(100));
    events.on_progress(Direction::Download, 20, Some(100));
    events.on_complete(Ok(()));

    assert_eq!(log.entries(), vec!["download:Some(0.1)", "complete:false"]);
    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(transport.cancel_count(), 1);
}

#[test]
fn test_state_is_readable_from_observers() {
    let transport = MockTransport::new();
    let slot: Arc<Mutex<Option<RequestTask>>> = Arc::new(Mutex::new(None));
    let states = Arc::new(Mutex::new(Vec::new()));

    let response_slot = slot.clone();
    let response_states = states.clone();
    let completion_slot = slot.clone();
    let completion_states = states.clone();
    let task = RequestTask::builder(transport.clone(), get())
        .on_response(move |_| {
            let task = response_slot.lock().unwrap().clone().unwrap();
            response_states.lock().unwrap().push(task.state());
            assert!(task.response().is_some());
        })
        .on_completion(move |_| {
            let task = completion_slot.lock().unwrap().clone().unwrap();
            completion_states.lock().unwrap().push(task.state());
            assert!(task.response_data().is_some());
        })
        .build()
        .unwrap();
    *slot.lock().unwrap() = Some(task.clone());
    task.start().unwrap();

    let events = transport.events(0);
    events.on_response(response_for(URL, StatusCode::OK, None));
    events.on_complete(Ok(()));

    assert_eq!(
        *states.lock().unwrap(),
        vec![TaskState::Running, TaskState::Succeeded]
    );
}

#[test]
fn test_concurrent_cancel_and_completion_report_once() {
    for _ in 0..200 {
        let transport = MockTransport::new();
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        let task = RequestTask::send(
            transport.clone(),
            get(),
            Observers::new().on_completion(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let events = transport.events(0);

        let completer = std::thread::spawn(move || {
            events.on_data(Bytes::from_static(b"body"));
            events.on_complete(Ok(()));
        });
        let canceller = {
            let task = task.clone();
            std::thread::spawn(move || task.cancel())
        };
        completer.join().unwrap();
        canceller.join().unwrap();

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        match task.state() {
            TaskState::Succeeded => {
                assert!(task.response_data().is_some());
                assert!(task.error().is_none());
            }
            TaskState::Cancelled => {
                assert!(task.response_data().is_none());
                assert!(matches!(task.error(), Some(Error::Cancelled)));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }
}

#[test]
fn test_submit_failure_is_delivered_to_completion() {
    let transport = MockTransport::new();
    transport.fail_next_submit(Error::Internal("transport unavailable".to_string()));
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    assert_eq!(task.state(), TaskState::Failed);
    assert!(task.task().is_none());
    assert_eq!(log.count("complete:err"), 1);
}

#[test]
fn test_observers_cannot_change_after_start() {
    let transport = MockTransport::new();
    let log = CallLog::default();
    let task = send(&transport, get(), &log);

    let replaced = Arc::new(AtomicUsize::new(0));
    let counter = replaced.clone();
    let result = task.set_completion_observer(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(matches!(result, Err(Error::AlreadyStarted)));
    assert!(task.set_response_observer(|_| {}).is_err());
    assert!(task.set_upload_progress_observer(|_| {}).is_err());
    assert!(task.set_download_progress_observer(|_| {}).is_err());

    transport.events(0).on_complete(Ok(()));
    assert_eq!(replaced.load(Ordering::SeqCst), 0);
    assert_eq!(log.count("complete:ok"), 1);
}

#[test]
fn test_observers_set_before_start_are_used() {
    let transport = MockTransport::new();
    let task = RequestTask::new(transport.clone(), get(), TaskOptions::default(), Observers::new())
        .unwrap();

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let seen = statuses.clone();
    task.set_response_observer(move |response| seen.lock().unwrap().push(response.status()))
        .unwrap();
    task.start().unwrap();

    transport
        .events(0)
        .on_response(response_for(URL, StatusCode::NOT_FOUND, None));
    assert_eq!(*statuses.lock().unwrap(), vec![StatusCode::NOT_FOUND]);
}

#[test]
fn test_cached_response_is_exposed_on_start() {
    let transport = MockTransport::new();
    let request = get();
    transport.cache.insert(
        request.fingerprint(),
        CachedResponse::new(
            response_for(URL, StatusCode::OK, None),
            Bytes::from_static(br#"{"name":"report","pages":3}"#),
        ),
    );

    let task = RequestTask::new(transport.clone(), request, TaskOptions::default(), Observers::new())
        .unwrap();
    assert!(task.cached_url_response().is_none());
    task.start().unwrap();

    let cached = task.cached_url_response().unwrap();
    assert_eq!(cached.data, Bytes::from_static(br#"{"name":"report","pages":3}"#));
    let dictionary = task.cached_dictionary_response().unwrap();
    assert_eq!(dictionary["pages"], 3);
    assert_eq!(transport.submit_count(), 1);
}

#[test]
fn test_cached_non_object_has_no_dictionary() {
    let transport = MockTransport::new();
    let request = get();
    transport.cache.insert(
        request.fingerprint(),
        CachedResponse::new(
            response_for(URL, StatusCode::OK, None),
            Bytes::from_static(b"[1, 2, 3]"),
        ),
    );

    let task = RequestTask::send(transport.clone(), request, Observers::new());
    assert!(task.cached_url_response().is_some());
    assert!(task.cached_dictionary_response().is_none());
}

#[test]
fn test_corrupt_resume_data_fails_without_submitting() {
    let transport = MockTransport::new();
    let options = TaskOptions {
        background: true,
        resume_data: Some(b"not resume data".to_vec()),
    };

    let result = RequestTask::new(transport.clone(), get(), options, Observers::new());
    let error = result.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::MalformedResumeData);
    assert_eq!(transport.submit_count(), 0);
}

#[test]
fn test_resume_data_for_other_url_is_rejected() {
    let transport = MockTransport::new();
    let resume = ResumeData::new(
        "https://example.com/other".parse().unwrap(),
        10,
        "/tmp/other.part".into(),
    )
    .encode()
    .unwrap();

    let result = RequestTask::builder(transport.clone(), get())
        .background(true)
        .resume_data(resume)
        .start();
    assert!(matches!(result, Err(Error::MalformedResumeData(_))));
    assert_eq!(transport.submit_count(), 0);
}

#[test]
fn test_resume_data_requires_background_task() {
    let transport = MockTransport::new();
    let resume = ResumeData::new(URL.parse().unwrap(), 10, "/tmp/report.part".into())
        .encode()
        .unwrap();

    let result = RequestTask::builder(transport.clone(), get())
        .resume_data(resume)
        .build();
    assert!(matches!(result, Err(Error::MalformedResumeData(_))));
}

#[test]
fn test_resume_data_is_handed_to_transport() {
    let staging = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    transport.set_staging_directory(staging.path());
    let resume = ResumeData::new(URL.parse().unwrap(), 2048, staging.path().join("report.part"))
        .with_validator(Some("\"v1\"".to_string()));

    let task = RequestTask::builder(transport.clone(), get())
        .background(true)
        .resume_data(resume.encode().unwrap())
        .start()
        .unwrap();

    assert!(task.is_background_task());
    assert!(task.task().unwrap().is_background());
    transport.with_submission(0, |submission| {
        assert!(submission.background);
        assert_eq!(submission.resume_data.as_ref(), Some(&resume));
    });
}

#[test]
fn test_cancel_producing_resume_data() {
    let staging = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    transport.set_staging_directory(staging.path());
    let resume = ResumeData::new(URL.parse().unwrap(), 4096, staging.path().join("report.part"));
    transport.set_resume_data(resume.clone());

    let task = RequestTask::builder(transport.clone(), get())
        .background(true)
        .start()
        .unwrap();
    let blob = task.cancel_producing_resume_data().unwrap();

    assert_eq!(task.state(), TaskState::Cancelled);
    assert_eq!(ResumeData::decode(&blob).unwrap(), resume);

    // The blob starts a new task for the same URL.
    let resumed = RequestTask::builder(transport.clone(), get())
        .background(true)
        .resume_data(blob)
        .start()
        .unwrap();
    assert_eq!(resumed.state(), TaskState::Running);
    transport.with_submission(1, |submission| {
        assert_eq!(submission.resume_data.as_ref(), Some(&resume));
    });
}

#[test]
fn test_resume_data_staged_elsewhere_is_rejected() {
    let staging = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let victim = elsewhere.path().join("important.txt");
    std::fs::write(&victim, b"keep me").unwrap();

    let transport = MockTransport::new();
    transport.set_staging_directory(staging.path());
    let resume = ResumeData::new(URL.parse().unwrap(), 3, victim.clone())
        .encode()
        .unwrap();

    let result = RequestTask::builder(transport.clone(), get())
        .background(true)
        .resume_data(resume)
        .start();

    assert!(matches!(result, Err(Error::MalformedResumeData(_))));
    assert_eq!(transport.submit_count(), 0);
    assert_eq!(std::fs::read(&victim).unwrap(), b"keep me");
}

#[test]
fn test_resume_data_escaping_staging_directory_is_rejected() {
    let staging = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    transport.set_staging_directory(staging.path());
    let escaping = staging.path().join("..").join("report.part");
    let resume = ResumeData::new(URL.parse().unwrap(), 3, escaping)
        .encode()
        .unwrap();

    let result = RequestTask::builder(transport.clone(), get())
        .background(true)
        .resume_data(resume)
        .build();
    assert!(matches!(result, Err(Error::MalformedResumeData(_))));
}

#[test]
fn test_foreground_cancel_produces_no_resume_data() {
    let transport = MockTransport::new();
    transport.set_resume_data(ResumeData::new(URL.parse().unwrap(), 1, "/tmp/x.part".into()));

    let task = RequestTask::send(transport.clone(), get(), Observers::new());
    assert!(task.cancel_producing_resume_data().is_none());
    assert_eq!(task.state(), TaskState::Cancelled);
}

#[test]
fn test_original_request_is_kept() {
    let transport = MockTransport::new();
    let request = Request::post(URL)
        .unwrap()
        .header("X-Trace", "abc")
        .unwrap()
        .json(&serde_json::json!({ "id": 7 }))
        .unwrap()
        .build();

    let task = RequestTask::send(transport.clone(), request.clone(), Observers::new());
    assert_eq!(task.original_request().url(), request.url());
    assert_eq!(task.original_request().headers()["x-trace"], "abc");
    transport.with_submission(0, |submission| {
        assert_eq!(submission.request.method(), request.method());
    });
}

#[tokio::test]
async fn test_finished_resolves_with_body() {
    let transport = MockTransport::new();
    let task = RequestTask::send(transport.clone(), get(), Observers::new());

    let events = transport.events(0);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        events.on_data(Bytes::from_static(b"payload"));
        events.on_complete(Ok(()));
    });

    let body = tokio::time::timeout(Duration::from_secs(5), task.finished())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body, Bytes::from_static(b"payload"));
}

#[tokio::test]
async fn test_finished_resolves_after_cancel() {
    let transport = MockTransport::new();
    let task = RequestTask::send(transport.clone(), get(), Observers::new());
    task.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task.finished())
        .await
        .unwrap();
    assert!(result.unwrap_err().is_cancelled());
}

#[test]
fn test_transport_staging_directory_defaults_to_shared_location() {
    let transport = MockTransport::new();
    assert_eq!(
        transport.staging_directory(),
        urltask::background_session_files_directory()
    );
}
