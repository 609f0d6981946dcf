//! Tests for `link`-header pagination.

use ci_harvest::{GitHubClient, PageWalk};
use mockito::{Matcher, Mock, Server};
use serde_json::{Value, json};

fn client_for(server: &Server) -> GitHubClient {
    GitHubClient::builder().base_uri(server.url()).build().unwrap()
}

/// Serve `pages` pages of two items each, chained through `next` links.
async fn page_chain(server: &mut Server, pages: usize) -> Vec<Mock> {
    let base = server.url();
    let path = |n: usize| {
        if n == 1 {
            "/repos/o/r/commits".to_string()
        } else {
            format!("/pages/{n}")
        }
    };

    let mut mocks = Vec::new();
    for n in 1..=pages {
        let body = json!([{"id": n * 10}, {"id": n * 10 + 1}]);
        let mut links = vec![format!(r#"<{base}/pages/{pages}?per_page=100>; rel="last""#)];
        if n < pages {
            links.insert(0, format!(r#"<{base}/pages/{}?per_page=100>; rel="next""#, n + 1));
        }
        let mock = server
            .mock("GET", path(n).as_str())
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("link", &links.join(", "))
            .with_body(body.to_string())
            .create_async()
            .await;
        mocks.push(mock);
    }
    mocks
}

fn ids(items: &[Value]) -> Vec<i64> {
    items.iter().filter_map(|i| i["id"].as_i64()).collect()
}

#[tokio::test]
async fn test_unbounded_walk_reads_every_page() {
    let mut server = Server::new_async().await;
    let _mocks = page_chain(&mut server, 3).await;
    let client = client_for(&server);

    let result = client
        .walk_pages(PageWalk::new(&client.ghurl("repos/o/r/commits"), -1))
        .await
        .unwrap();
    assert_eq!(ids(&result.items), vec![10, 11, 20, 21, 30, 31]);
    assert_eq!(result.next_url, None);
    assert!(result.last_url.unwrap().contains("/pages/3"));
}

#[tokio::test]
async fn test_page_budget_stops_early() {
    let mut server = Server::new_async().await;
    let _mocks = page_chain(&mut server, 3).await;
    let client = client_for(&server);

    let result = client
        .walk_pages(PageWalk::new(&client.ghurl("repos/o/r/commits"), 2))
        .await
        .unwrap();
    assert_eq!(ids(&result.items), vec![10, 11, 20, 21]);
    assert!(result.next_url.unwrap().contains("/pages/3"));
}

#[tokio::test]
async fn test_paged_request_concatenates() {
    let mut server = Server::new_async().await;
    let _mocks = page_chain(&mut server, 2).await;
    let client = client_for(&server);

    let items = client
        .paged_request(&client.ghurl("repos/o/r/commits"), 0)
        .await
        .unwrap();
    assert_eq!(items.len(), 4);
}

#[tokio::test]
async fn test_wrapped_pages_unwrapped() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/repos/o/r/actions/workflows")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"total_count": 2, "workflows": [{"id": 1}, {"id": 2}]}"#)
        .create_async()
        .await;
    let client = client_for(&server);

    let url = client.ghurl("repos/o/r/actions/workflows");
    let result = client
        .walk_pages(PageWalk::new(&url, -1).items_key("workflows"))
        .await
        .unwrap();
    assert_eq!(ids(&result.items), vec![1, 2]);
}

#[tokio::test]
async fn test_absent_listing_is_empty() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/repos/o/gone/issues")
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;
    let client = client_for(&server);

    let items = client
        .paged_request(&client.ghurl("repos/o/gone/issues"), -1)
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_num_pages_reads_last_link() {
    let mut server = Server::new_async().await;
    let _mocks = page_chain(&mut server, 4).await;
    let client = client_for(&server);

    assert_eq!(client.num_pages(&client.ghurl("repos/o/r/commits")).await.unwrap(), 4);
}

#[tokio::test]
async fn test_num_pages_without_links_is_one() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/repos/o/r/forks")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
    let client = client_for(&server);

    assert_eq!(client.num_pages(&client.ghurl("repos/o/r/forks")).await.unwrap(), 1);
}
