// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock controller REST API backed by mockito

use mockito::{Matcher, Mock, Server, ServerGuard};
use snapshot_harvester::config::ControllerCredentials;
use snapshot_harvester::controller::ControllerClient;
use std::time::Duration;

pub const APPLICATION_ID: u64 = 3042;
pub const INTERNAL_ID: i64 = 17;

pub struct MockController {
    pub server: ServerGuard,
}

impl MockController {
    /// Starts a controller that knows application 3042 as internal id 17 and
    /// two business transactions.
    pub async fn start() -> (Self, Vec<Mock>) {
        let mut server = Server::new_async().await;

        let application = server
            .mock(
                "GET",
                format!("/controller/rest/applications/{APPLICATION_ID}").as_str(),
            )
            .match_query(Matcher::UrlEncoded("output".into(), "JSON".into()))
            .with_status(200)
            .with_body(format!(r#"[{{"id": {INTERNAL_ID}, "name": "storefront"}}]"#))
            .create_async()
            .await;

        let transactions = server
            .mock(
                "GET",
                format!("/controller/rest/applications/{INTERNAL_ID}/business-transactions")
                    .as_str(),
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"id": 1, "name": "Checkout"}, {"id": 2, "name": "Login"}]"#)
            .create_async()
            .await;

        (MockController { server }, vec![application, transactions])
    }

    /// Every snapshot query for a `lookback_minutes` run returns `body` (or
    /// fails with `status`).
    pub async fn snapshots(
        &mut self,
        lookback_minutes: u32,
        status: usize,
        body: &str,
        expected_calls: usize,
    ) -> Mock {
        self.server
            .mock(
                "GET",
                format!("/controller/rest/applications/{INTERNAL_ID}/request-snapshots").as_str(),
            )
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("time-range-type".into(), "BETWEEN_TIMES".into()),
                Matcher::UrlEncoded("error-occurred".into(), "true".into()),
                Matcher::UrlEncoded("need-props".into(), "true".into()),
                Matcher::UrlEncoded("duration-in-mins".into(), lookback_minutes.to_string()),
            ]))
            .with_status(status)
            .with_body(body)
            .expect(expected_calls)
            .create_async()
            .await
    }

    pub fn client(&self) -> ControllerClient {
        let url = self.server.url();
        let (host, port) = url
            .trim_start_matches("http://")
            .split_once(':')
            .expect("mock server url has a port");
        let credentials = ControllerCredentials {
            protocol: "http".to_string(),
            host: host.to_string(),
            port: port.parse().expect("port is numeric"),
            user: "reader".to_string(),
            password: "s3cret".to_string(),
            account: "acme".to_string(),
        };
        ControllerClient::new(&credentials, None, Duration::from_secs(5))
            .expect("failed to build controller client")
    }
}
