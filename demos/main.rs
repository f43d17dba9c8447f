//! Switchyard SDK lab
//!
//! Internal smoke harness exercising the SDK surface without a server.
//! Run with: cargo run --example sdk-lab

use std::collections::HashMap;

use switchyard::{SwitchyardClient, SwitchyardOptions};

const PASS: &str = "\x1b[32m[PASS]\x1b[0m";
const FAIL: &str = "\x1b[31m[FAIL]\x1b[0m";

#[tokio::main]
async fn main() {
    println!("=== Switchyard Rust SDK Lab ===\n");

    let mut passed = 0;
    let mut failed = 0;

    macro_rules! check {
        ($name:expr, $cond:expr) => {{
            if $cond {
                println!("{PASS} {}", $name);
                passed += 1;
            } else {
                println!("{FAIL} {}", $name);
                failed += 1;
            }
        }};
    }

    let mut bootstrap: HashMap<String, serde_json::Value> = HashMap::new();
    bootstrap.insert("lab-bool".to_string(), serde_json::json!(true));
    bootstrap.insert("lab-string".to_string(), serde_json::json!("Hello Lab"));
    bootstrap.insert("lab-number".to_string(), serde_json::json!(42.0));
    bootstrap.insert(
        "lab-json".to_string(),
        serde_json::json!({"nested": true, "count": 100.0}),
    );

    // Offline keeps the lab hermetic: no server, bootstrap answers.
    let options = SwitchyardOptions::builder("sdk_lab_test_key")
        .offline(true)
        .bootstrap(bootstrap)
        .build();

    let client = match SwitchyardClient::new(options) {
        Ok(client) => client,
        Err(e) => {
            println!("{FAIL} construction - {e}");
            std::process::exit(1);
        }
    };

    check!("initialize()", client.initialize().await.is_ok());
    check!("wait_for_ready()", client.wait_for_ready_default().await);

    println!("\nFlag evaluation:");
    check!(
        "boolean flag",
        client.get_boolean_value("lab-bool", false, None)
    );
    check!(
        "string flag",
        client.get_string_value("lab-string", "", None) == "Hello Lab"
    );
    check!(
        "number flag",
        (client.get_number_value("lab-number", 0.0, None) - 42.0).abs() < f64::EPSILON
    );
    check!(
        "json flag",
        client
            .get_json_value("lab-json", None, None)
            .and_then(|v| v.get("nested").cloned())
            .and_then(|v| v.as_bool())
            == Some(true)
    );
    check!(
        "missing flag uses default",
        client.get_boolean_value("non-existent", true, None)
    );

    println!("\nContext management:");
    let mut attrs: HashMap<String, serde_json::Value> = HashMap::new();
    attrs.insert("plan".to_string(), serde_json::json!("premium"));
    client.identify("lab-user-123", Some(attrs));
    check!(
        "identify()",
        client.get_context().and_then(|c| c.user_id) == Some("lab-user-123".to_string())
    );
    check!(
        "custom attributes",
        client
            .get_context()
            .and_then(|c| c.custom.get("plan").cloned())
            == Some(serde_json::json!("premium"))
    );
    client.reset();
    check!(
        "reset() goes anonymous",
        client.get_context().map(|c| c.anonymous) == Some(true)
    );

    println!("\nEvents:");
    let mut data: HashMap<String, serde_json::Value> = HashMap::new();
    data.insert("sdk".to_string(), serde_json::json!("rust"));
    client.track("lab_verification", Some(data));
    check!("track()", client.event_queue_size() >= 1);

    println!("\nCleanup:");
    client.close().await;
    check!("close()", client.is_closed());

    println!("\n{}", "=".repeat(40));
    println!("Results: {passed} passed, {failed} failed");
    println!("{}", "=".repeat(40));

    std::process::exit(if failed > 0 { 1 } else { 0 });
}
