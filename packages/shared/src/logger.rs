//! Logging setup utilities for the Kairo binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber with the specified default log level.
///
/// Both the Kairo library crates and the binary itself log at
/// `default_log_level`. The filter can be overridden with `RUST_LOG`.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "kairo-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info")
///
/// # Examples
///
/// ```no_run
/// use kairo_shared::logger::setup_logger;
///
/// setup_logger("kairo-server", "debug");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .init();
}

/// Build the default `EnvFilter` directive string.
fn default_filter(binary_name: &str, default_log_level: &str) -> String {
    let binary_target = binary_name.replace('-', "_");
    let mut targets = vec!["kairo_shared", "kairo_server", "kairo_client"];
    if !targets.contains(&binary_target.as_str()) {
        targets.push(&binary_target);
    }

    targets
        .iter()
        .map(|target| format!("{}={}", target, default_log_level))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_workspace_crates_and_binary() {
        // テスト項目: デフォルトフィルタがワークスペースのクレートとバイナリを含む
        // when (操作):
        let filter = default_filter("kairo-server", "debug");

        // then (期待する結果):
        assert_eq!(
            filter,
            "kairo_shared=debug,kairo_server=debug,kairo_client=debug"
        );
    }

    #[test]
    fn test_default_filter_appends_unknown_binary() {
        // テスト項目: ワークスペース外のバイナリ名はターゲットとして追加される
        // when (操作):
        let filter = default_filter("chat-bench", "info");

        // then (期待する結果):
        assert!(filter.ends_with(",chat_bench=info"));
    }
}
