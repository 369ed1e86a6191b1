use crate::error::AppError;
use crate::feed::filter::{filter_messages, FilterArgs};
use crate::feed::pipeline::now_unix_ms;
use crate::feed::types::FeedView;
use crate::state::AppState;

/// Filtered view over the current store. The store is only read.
pub async fn feed_messages(
    state: &AppState,
    args: Option<FilterArgs>,
) -> Result<FeedView, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    let (snapshot, pairs) = {
        let readable = state.feed.store.read();
        (readable.snapshot(), readable.unique_pairs())
    };

    let messages = filter_messages(&snapshot, &config, now_unix_ms());
    Ok(FeedView {
        total: snapshot.len(),
        messages,
        pairs,
    })
}

/// Distinct pairs currently in the store, for populating filter choices.
pub async fn feed_pairs(state: &AppState) -> Result<Vec<String>, AppError> {
    Ok(state.feed.store.read().unique_pairs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::message::{Message, MessageTimestamp, MessageType, SetupType};

    fn seeded_state() -> AppState {
        let state = AppState::new();
        let mut signal = Message::empty(MessageType::Signal);
        signal.pair = Some("BTCUSDT".to_string());
        signal.setup_type = Some(SetupType::Long);
        signal.timestamp = Some(MessageTimestamp::parse("2025-01-01T00:00:00Z"));

        let mut market = Message::empty(MessageType::Market);
        market.pair = Some("ETHUSDT".to_string());

        {
            let mut store = state.feed.store.write();
            store.bulk_load(vec![signal]);
            store.prepend_live(market);
        }
        state
    }

    #[tokio::test]
    async fn default_filter_returns_everything() {
        let state = seeded_state();
        let view = feed_messages(&state, None).await.unwrap();

        assert_eq!(view.total, 2);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.pairs, vec!["ETHUSDT".to_string(), "BTCUSDT".to_string()]);
    }

    #[tokio::test]
    async fn pair_filter_narrows_without_mutating_the_store() {
        let state = seeded_state();
        let view = feed_messages(
            &state,
            Some(FilterArgs {
                pair: Some("BTCUSDT".to_string()),
                ..FilterArgs::default()
            }),
        )
        .await
        .unwrap();

        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].pair.as_deref(), Some("BTCUSDT"));
        assert_eq!(view.total, 2);
        assert_eq!(state.feed.store.read().len(), 2);
    }

    #[tokio::test]
    async fn invalid_filter_is_rejected() {
        let state = seeded_state();
        let result = feed_messages(
            &state,
            Some(FilterArgs {
                time_range: Some("soon".to_string()),
                ..FilterArgs::default()
            }),
        )
        .await;

        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn pairs_follow_store_order() {
        let state = seeded_state();
        assert_eq!(
            feed_pairs(&state).await.unwrap(),
            vec!["ETHUSDT".to_string(), "BTCUSDT".to_string()]
        );
    }
}
