//! End-to-end exercise of the protocol client against a fake RETS server:
//! a hand-rolled HTTP/1.1 responder (no `wiremock`, keeping the dependency
//! set aligned with the crate's own stack) serving canned `Login`/`Search`
//! bodies over a loopback `TcpListener`.

use rets_sync::config::RetsCredentials;
use rets_sync::rets::operations::{self, SearchRequest};
use rets_sync::rets::RetsClient;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const LOGIN_BODY: &str = "<RETS-RESPONSE>\r\n\
ReplyCode=0\r\n\
ReplyText=V2.7.0\r\n\
Search=/rets/search\r\n\
GetMetadata=/rets/getmetadata\r\n\
Logout=/rets/logout\r\n\
</RETS-RESPONSE>";

const SEARCH_BODY: &str = "ReplyCode=\"0\" ReplyText=\"Success\"\r\n\
<COUNT Records=\"2\" />\r\n\
<COLUMNS>\tL_ListingID\tL_Status\t</COLUMNS>\r\n\
<DATA>\t1001\tActive\t</DATA>\r\n\
<DATA>\t1002\tSold\t</DATA>";

/// Serve `request_count` sequential HTTP/1.1 requests on one loopback
/// connection each, responding with `LOGIN_BODY` to `/login` and
/// `SEARCH_BODY` to `/rets/search`.
async fn serve_fixed_responses(listener: TcpListener, request_count: usize) {
	for _ in 0..request_count {
		let (mut socket, _) = listener.accept().await.expect("accept");
		let mut buf = vec![0u8; 8192];
		let n = socket.read(&mut buf).await.expect("read request");
		let request = String::from_utf8_lossy(&buf[..n]);
		let path = request.lines().next().unwrap_or("").split_whitespace().nth(1).unwrap_or("/");

		let (set_cookie, body) = if path.starts_with("/login") {
			("Set-Cookie: RETS-Session-ID=abc123; path=/\r\n", LOGIN_BODY)
		} else {
			("", SEARCH_BODY)
		};

		let response = format!(
			"HTTP/1.1 200 OK\r\n{set_cookie}Content-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
			body.len(),
			body
		);
		socket.write_all(response.as_bytes()).await.expect("write response");
		socket.shutdown().await.ok();
	}
}

#[tokio::test]
async fn login_then_search_round_trips_through_the_real_parser() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("addr");
	tokio::spawn(serve_fixed_responses(listener, 2));

	let dir = tempfile::tempdir().unwrap();
	let credentials = RetsCredentials {
		login_url: format!("http://{addr}/login"),
		version: "RETS/1.7.2".to_string(),
		vendor: None,
		username: "user".to_string(),
		password: "pass".to_string(),
		user_agent: "rets-sync-test/1.0".to_string(),
	};
	let client = RetsClient::new(credentials, dir.path().join("session.json"), Duration::from_secs(5)).unwrap();

	let session = client.login().await.expect("login should succeed");
	assert_eq!(session.capability_url("Search"), Some("/rets/search"));

	// The server only understands loopback-relative paths; rewrite the
	// capability URL to point back at our fake listener the way a real
	// server's absolute capability URLs would.
	let search_url = format!("http://{addr}/rets/search");
	let mut session_with_absolute_url = session.clone();
	session_with_absolute_url
		.capabilities
		.insert("Search".to_string(), search_url);

	let request = SearchRequest::compact("Property", "RE_1", "(L_Status=A)", 100, 0);
	let result = operations::search(&client, &session_with_absolute_url, &request)
		.await
		.expect("search should succeed");

	assert_eq!(result.count, Some(2));
	assert_eq!(result.columns, vec!["L_ListingID", "L_Status"]);
	assert_eq!(result.rows.len(), 2);
	assert_eq!(result.rows[0], vec!["1001", "Active"]);
	assert_eq!(result.rows[1], vec!["1002", "Sold"]);
}
