#[cfg(test)]
mod tests {
    use crate::utils::{
        batch_archive, last_state, mock_page, mock_schemas, records, schema_streams, sync,
        sync_with_cancel, test_config,
    };
    use engine_core::{
        error::SourceError,
        state::{TapState, load_state},
    };
    use engine_runtime::{error::SyncError, execution::executor::SyncOutcome};
    use mockito::{Matcher, Server};
    use model::core::stream::StreamId;
    use serde_json::{Value, json};
    use std::{io::Write, time::Duration};
    use tempfile::NamedTempFile;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    fn email_ids(records: &[Value]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| r["email_id"].as_str())
            .collect()
    }

    // Scenario: first run with no state and every stream enabled.
    // Expected: all history is read, records are reshaped, and the run closes
    // with every window moved up to the run start.
    #[traced_test]
    #[tokio::test]
    async fn full_sync_from_empty_state() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let lists = [
            mock_page(
                &mut server,
                "/3.0/lists",
                0,
                "lists",
                json!([{"id": "l1", "name": "Newsletter", "_links": [{"rel": "self"}]}]),
                1,
            )
            .await,
            mock_page(&mut server, "/3.0/lists", 1, "lists", json!([]), 1).await,
        ];
        let campaigns = [
            mock_page(
                &mut server,
                "/3.0/campaigns",
                0,
                "campaigns",
                json!([
                    {"id": "c1", "send_time": ""},
                    {"id": "c2", "send_time": "2024-01-01T00:00:00+00:00"}
                ]),
                2,
            )
            .await,
            mock_page(&mut server, "/3.0/campaigns", 2, "campaigns", json!([]), 2).await,
        ];
        let members = [
            mock_page(
                &mut server,
                "/3.0/lists/l1/members",
                0,
                "members",
                json!([{
                    "id": "m1",
                    "list_id": "l1",
                    "last_changed": "2024-02-01T00:00:00+00:00",
                    "merge_fields": {"FNAME": "Ann"},
                    "interests": {"i1": true}
                }]),
                1,
            )
            .await,
            mock_page(&mut server, "/3.0/lists/l1/members", 1, "members", json!([]), 1).await,
        ];
        let merge_fields = mock_page(
            &mut server,
            "/3.0/lists/l1/merge-fields",
            0,
            "merge_fields",
            json!([{"merge_id": 1, "tag": "FNAME", "name": "First Name", "type": "text"}]),
            1,
        )
        .await;
        let activity = [
            mock_page(
                &mut server,
                "/3.0/reports/c1/email-activity",
                0,
                "emails",
                json!([
                    {"campaign_id": "c1", "email_id": "e1", "activity": [{"action": "open"}]},
                    {"campaign_id": "c1", "email_id": "e2", "activity": []}
                ]),
                2,
            )
            .await,
            mock_page(&mut server, "/3.0/reports/c1/email-activity", 2, "emails", json!([]), 2)
                .await,
            mock_page(&mut server, "/3.0/reports/c2/email-activity", 0, "emails", json!([]), 0)
                .await,
        ];

        let config = test_config(&server, json!({}));
        let (outcome, messages) = sync(config, TapState::default()).await;

        assert_eq!(outcome.unwrap(), SyncOutcome::Completed);
        for mock in lists.iter().chain(&campaigns).chain(&members).chain(&activity) {
            mock.assert_async().await;
        }
        merge_fields.assert_async().await;

        assert_eq!(
            schema_streams(&messages),
            vec!["lists", "campaigns", "list_members", "email_activity_reports"]
        );

        let lists = records(&messages, "lists");
        assert_eq!(lists.len(), 1);
        assert!(lists[0].get("_links").is_none());

        let campaigns = records(&messages, "campaigns");
        assert_eq!(campaigns.len(), 2);
        assert!(campaigns[0].get("send_time").is_none());
        assert_eq!(campaigns[1]["send_time"], "2024-01-01T00:00:00+00:00");

        let members = records(&messages, "list_members");
        assert_eq!(
            members[0]["merge_fields"],
            json!([{"merge_id": 1, "tag": "FNAME", "name": "First Name", "type": "text", "value": "Ann"}])
        );
        assert_eq!(members[0]["interests"], json!([{"id": "i1", "value": true}]));

        let activity = records(&messages, "email_activity_reports");
        assert_eq!(email_ids(&activity), vec!["e1"]);

        let state = last_state(&messages);
        assert!(state.get("current_run").is_none());
        assert!(state["last_run"].is_string());
        for stream in StreamId::ALL {
            assert_eq!(state["bookmarks"][stream.as_str()]["since"], state["last_run"]);
            assert!(state["bookmarks"][stream.as_str()].get("ids").is_none());
        }
    }

    // Scenario: a legacy flat state file from an older release.
    // Expected: the member window starts at the saved bookmark minus the lag.
    #[traced_test]
    #[tokio::test]
    async fn resumes_members_window_from_legacy_state_file() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let _lists = [
            mock_page(&mut server, "/3.0/lists", 0, "lists", json!([{"id": "l1"}]), 1).await,
            mock_page(&mut server, "/3.0/lists", 1, "lists", json!([]), 1).await,
        ];
        let windowed = server
            .mock("GET", "/3.0/lists/l1/members")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("since_last_changed".into(), "2019-12-29T00:00:00Z".into()),
                Matcher::UrlEncoded("offset".into(), "0".into()),
            ]))
            .with_status(200)
            .with_body(json!({"members": [{"id": "m1", "list_id": "l1"}], "total_items": 1}).to_string())
            .expect(1)
            .create_async()
            .await;
        let drained = server
            .mock("GET", "/3.0/lists/l1/members")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("since_last_changed".into(), "2019-12-29T00:00:00Z".into()),
                Matcher::UrlEncoded("offset".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(json!({"members": [], "total_items": 1}).to_string())
            .expect(1)
            .create_async()
            .await;

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"list_members": {{"since": "2020-01-01T00:00:00Z"}}}}"#).unwrap();
        let state = load_state(Some(file.path())).unwrap();

        let config = test_config(
            &server,
            json!({
                "streams": ["lists", "list_members"],
                "merge_fields_array": false,
                "interests_array": false
            }),
        );
        let (outcome, messages) = sync(config, state).await;

        assert_eq!(outcome.unwrap(), SyncOutcome::Completed);
        windowed.assert_async().await;
        drained.assert_async().await;
        assert_eq!(records(&messages, "list_members").len(), 1);
        assert!(last_state(&messages)["bookmarks"]["list_members"]["since"].is_string());
    }

    // Scenario: a page size of 2 over a collection of 3.
    // Expected: offsets 0, 2 and 3 are each requested once; the empty page
    // ends the partition and progress is checkpointed after every page.
    #[traced_test]
    #[tokio::test]
    async fn paginates_until_an_empty_page() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let pages = [
            mock_page(
                &mut server,
                "/3.0/lists",
                0,
                "lists",
                json!([{"id": "l1"}, {"id": "l2"}]),
                3,
            )
            .await,
            mock_page(&mut server, "/3.0/lists", 2, "lists", json!([{"id": "l3"}]), 3).await,
            mock_page(&mut server, "/3.0/lists", 3, "lists", json!([]), 3).await,
        ];

        let config = test_config(&server, json!({"streams": ["lists"]}));
        let (outcome, messages) = sync(config, TapState::default()).await;

        assert_eq!(outcome.unwrap(), SyncOutcome::Completed);
        for page in &pages {
            page.assert_async().await;
        }
        assert_eq!(records(&messages, "lists").len(), 3);

        let checkpointed: Vec<u64> = messages
            .iter()
            .filter_map(|msg| match msg {
                model::messages::Message::State { value } => {
                    value["bookmarks"]["lists"]["partitions"]["lists"]["count"].as_u64()
                }
                _ => None,
            })
            .collect();
        assert!(checkpointed.contains(&2));
        assert!(checkpointed.contains(&3));
    }

    // Scenario: a run interrupted after `lists` finished and two members of
    // `l1` were consumed.
    // Expected: `lists` is not read again and members resume at offset 2.
    #[traced_test]
    #[tokio::test]
    async fn resumes_an_interrupted_run() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let lists = server
            .mock("GET", "/3.0/lists")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let resumed = [
            mock_page(
                &mut server,
                "/3.0/lists/l1/members",
                2,
                "members",
                json!([{"id": "m3", "list_id": "l1"}]),
                3,
            )
            .await,
            mock_page(&mut server, "/3.0/lists/l1/members", 3, "members", json!([]), 3).await,
        ];

        let state = TapState::from_value(json!({
            "current_run": "2024-05-01T00:00:00Z",
            "currently_syncing": "list_members",
            "bookmarks": {
                "lists": {"done": true, "ids": ["l1"]},
                "list_members": {"partitions": {"l1": {"count": 2, "done": false}}}
            }
        }))
        .unwrap();

        let config = test_config(
            &server,
            json!({"streams": ["lists", "list_members"], "merge_fields_array": false}),
        );
        let (outcome, messages) = sync(config, state).await;

        assert_eq!(outcome.unwrap(), SyncOutcome::Completed);
        lists.assert_async().await;
        for page in &resumed {
            page.assert_async().await;
        }

        let members = records(&messages, "list_members");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0]["id"], "m3");

        let state = last_state(&messages);
        assert_eq!(state["last_run"], "2024-05-01T00:00:00Z");
        assert_eq!(
            state["bookmarks"]["list_members"]["since"],
            "2024-05-01T00:00:00Z"
        );
    }

    // Scenario: email activity read through the batch operations API.
    // Expected: result files are reassembled in offset order and empty
    // activity is dropped.
    #[traced_test]
    #[tokio::test]
    async fn exports_email_activity_through_a_batch() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let _campaigns = [
            mock_page(&mut server, "/3.0/campaigns", 0, "campaigns", json!([{"id": "c1"}]), 1)
                .await,
            mock_page(&mut server, "/3.0/campaigns", 1, "campaigns", json!([]), 1).await,
        ];
        let total = server
            .mock("GET", "/3.0/reports/c1/email-activity")
            .match_query(Matcher::UrlEncoded("fields".into(), "total_items".into()))
            .with_status(200)
            .with_body(r#"{"total_items": 3}"#)
            .expect(1)
            .create_async()
            .await;
        let submit = server
            .mock("POST", "/3.0/batches")
            .match_body(Matcher::Regex(r#""operation_id":"c1:2""#.into()))
            .with_status(200)
            .with_body(r#"{"id": "b1", "status": "started"}"#)
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("GET", "/3.0/batches/b1")
            .with_status(200)
            .with_body(
                json!({
                    "id": "b1",
                    "status": "finished",
                    "total_operations": 2,
                    "finished_operations": 2,
                    "response_body_url": format!("{}/results/b1.tar.gz", server.url())
                })
                .to_string(),
            )
            .create_async()
            .await;

        let archive = batch_archive(&[
            (
                "c1:2",
                200,
                json!({"emails": [{"campaign_id": "c1", "email_id": "e3", "activity": [{"action": "click"}]}]}),
            ),
            (
                "c1:0",
                200,
                json!({"emails": [
                    {"campaign_id": "c1", "email_id": "e1", "activity": [{"action": "open"}]},
                    {"campaign_id": "c1", "email_id": "e2", "activity": []}
                ]}),
            ),
        ]);
        let download = server
            .mock("GET", "/results/b1.tar.gz")
            .with_status(200)
            .with_body(archive)
            .expect(1)
            .create_async()
            .await;

        let config = test_config(
            &server,
            json!({
                "streams": ["campaigns", "email_activity_reports"],
                "use_email_activity_export": true
            }),
        );
        let (outcome, messages) = sync(config, TapState::default()).await;

        assert_eq!(outcome.unwrap(), SyncOutcome::Completed);
        total.assert_async().await;
        submit.assert_async().await;
        status.assert_async().await;
        download.assert_async().await;

        let activity = records(&messages, "email_activity_reports");
        assert_eq!(email_ids(&activity), vec!["e1", "e3"]);
    }

    // Scenario: the API rejects the credentials.
    // Expected: the run aborts without touching later streams and the saved
    // window is preserved.
    #[traced_test]
    #[tokio::test]
    async fn auth_failure_aborts_and_keeps_state() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let _lists = server
            .mock("GET", "/3.0/lists")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"title": "API Key Invalid", "detail": "Your API key may be invalid."}"#)
            .create_async()
            .await;
        let campaigns = server
            .mock("GET", "/3.0/campaigns")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let state = TapState::from_value(json!({"last_run": "2024-01-01T00:00:00Z"})).unwrap();
        let config = test_config(&server, json!({"streams": ["lists", "campaigns"]}));
        let (outcome, messages) = sync(config, state).await;

        match outcome {
            Err(SyncError::Stream { stream, source }) => {
                assert_eq!(stream, StreamId::Lists);
                assert!(source.aborts_run());
            }
            other => panic!("expected an aborted run, got {other:?}"),
        }
        campaigns.assert_async().await;

        let state = last_state(&messages);
        assert_eq!(state["last_run"], "2024-01-01T00:00:00Z");
        assert!(state["current_run"].is_string());
    }

    // Scenario: the campaigns response is missing its collection.
    // Expected: campaigns fails alone, its child stream is skipped, and the
    // run reports the failure without being finalized.
    #[traced_test]
    #[tokio::test]
    async fn malformed_stream_fails_alone() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let _lists = [
            mock_page(&mut server, "/3.0/lists", 0, "lists", json!([{"id": "l1"}]), 1).await,
            mock_page(&mut server, "/3.0/lists", 1, "lists", json!([]), 1).await,
        ];
        let _campaigns = server
            .mock("GET", "/3.0/campaigns")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"unexpected": []}"#)
            .create_async()
            .await;

        let config = test_config(
            &server,
            json!({"streams": ["lists", "campaigns", "email_activity_reports"]}),
        );
        let (outcome, messages) = sync(config, TapState::default()).await;

        match outcome {
            Err(SyncError::StreamsFailed(failed)) => assert_eq!(failed, vec![StreamId::Campaigns]),
            other => panic!("expected a stream failure, got {other:?}"),
        }
        assert_eq!(records(&messages, "lists").len(), 1);
        assert!(!schema_streams(&messages).contains(&"email_activity_reports".to_string()));

        let state = last_state(&messages);
        assert!(state.get("last_run").is_none());
        assert!(state["current_run"].is_string());
        assert_eq!(state["bookmarks"]["lists"]["done"], true);
    }

    // Scenario: shutdown is requested before the first stream starts.
    // Expected: nothing is read and the opened run is checkpointed.
    #[traced_test]
    #[tokio::test]
    async fn cancellation_stops_before_reading() {
        let server = Server::new_async().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = test_config(&server, json!({}));
        let (outcome, messages) = sync_with_cancel(config, TapState::default(), cancel).await;

        assert!(matches!(outcome, Err(SyncError::ShutdownRequested)));
        assert!(schema_streams(&messages).is_empty());
        assert!(last_state(&messages)["current_run"].is_string());
    }

    // Scenario: the maximum run time has already elapsed when the first
    // stream would start.
    // Expected: the run stops early without reading and keeps the opened run
    // for the next invocation.
    #[traced_test]
    #[tokio::test]
    async fn max_run_time_stops_early_and_keeps_the_run() {
        let mut server = Server::new_async().await;
        let lists = server
            .mock("GET", "/3.0/lists")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let mut config = test_config(&server, json!({"streams": ["lists"]}));
        config.max_run_time = Some(Duration::ZERO);
        let (outcome, messages) = sync(config, TapState::default()).await;

        assert_eq!(outcome.unwrap(), SyncOutcome::StoppedEarly);
        lists.assert_async().await;
        assert!(schema_streams(&messages).is_empty());

        let state = last_state(&messages);
        assert!(state["current_run"].is_string());
        assert!(state.get("last_run").is_none());
    }

    // Scenario: the export batch never finishes within the allowed wait.
    // Expected: email activity fails with a batch timeout while campaigns
    // completes, and the run stays open.
    #[traced_test]
    #[tokio::test]
    async fn unfinished_batch_times_out() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let _campaigns = [
            mock_page(&mut server, "/3.0/campaigns", 0, "campaigns", json!([{"id": "c1"}]), 1)
                .await,
            mock_page(&mut server, "/3.0/campaigns", 1, "campaigns", json!([]), 1).await,
        ];
        let _total = server
            .mock("GET", "/3.0/reports/c1/email-activity")
            .match_query(Matcher::UrlEncoded("fields".into(), "total_items".into()))
            .with_status(200)
            .with_body(r#"{"total_items": 3}"#)
            .create_async()
            .await;
        let submit = server
            .mock("POST", "/3.0/batches")
            .with_status(200)
            .with_body(r#"{"id": "b1", "status": "started"}"#)
            .expect(1)
            .create_async()
            .await;
        let status = server
            .mock("GET", "/3.0/batches/b1")
            .with_status(200)
            .with_body(r#"{"id": "b1", "status": "started"}"#)
            .expect(0)
            .create_async()
            .await;

        let mut config = test_config(
            &server,
            json!({
                "streams": ["campaigns", "email_activity_reports"],
                "use_email_activity_export": true
            }),
        );
        config.export_max_wait = Duration::ZERO;
        let (outcome, messages) = sync(config, TapState::default()).await;

        match outcome {
            Err(SyncError::StreamsFailed(failed)) => {
                assert_eq!(failed, vec![StreamId::EmailActivityReports])
            }
            other => panic!("expected a stream failure, got {other:?}"),
        }
        submit.assert_async().await;
        status.assert_async().await;
        assert_eq!(records(&messages, "campaigns").len(), 1);
        assert!(records(&messages, "email_activity_reports").is_empty());

        let state = last_state(&messages);
        assert!(state["current_run"].is_string());
        assert!(state.get("last_run").is_none());
        assert_eq!(state["bookmarks"]["campaigns"]["done"], true);
    }

    // Scenario: the API keeps answering 503 until the retry budget is spent.
    // Expected: the run aborts on the first stream and the previous window
    // survives in state.
    #[traced_test]
    #[tokio::test]
    async fn exhausted_retries_abort_the_run() {
        let mut server = Server::new_async().await;
        let _schemas = mock_schemas(&mut server).await;

        let lists = server
            .mock("GET", "/3.0/lists")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body(r#"{"title": "Service Unavailable", "detail": "Try again later."}"#)
            .expect(1)
            .create_async()
            .await;

        let state = TapState::from_value(json!({"last_run": "2024-01-01T00:00:00Z"})).unwrap();
        let config = test_config(&server, json!({"streams": ["lists", "campaigns"]}));
        let (outcome, messages) = sync(config, state).await;

        match outcome {
            Err(SyncError::Stream { stream, source }) => {
                assert_eq!(stream, StreamId::Lists);
                assert!(matches!(source, SourceError::RetriesExhausted { attempts: 1, .. }));
                assert!(source.aborts_run());
            }
            other => panic!("expected an aborted run, got {other:?}"),
        }
        lists.assert_async().await;
        assert!(records(&messages, "lists").is_empty());

        let state = last_state(&messages);
        assert_eq!(state["last_run"], "2024-01-01T00:00:00Z");
        assert!(state["current_run"].is_string());
    }
}
