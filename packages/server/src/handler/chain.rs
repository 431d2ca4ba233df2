use super::MessageHandler;
use crate::connection::ConnectionRef;

/// Ordered list of handlers tried in insertion order.
///
/// Built during startup wiring and read-only afterwards.
#[derive(Default)]
pub struct ChainedHandler {
    handlers: Vec<Box<dyn MessageHandler>>,
}

impl ChainedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the end of the chain.
    pub fn add(&mut self, handler: Box<dyn MessageHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl MessageHandler for ChainedHandler {
    fn handle(&self, sender: &ConnectionRef, message: &[u8]) -> bool {
        self.handlers
            .iter()
            .any(|handler| handler.handle(sender, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connection::tests::connected_pair, handler::MockMessageHandler};

    fn handler_returning(claimed: bool, times: usize) -> Box<MockMessageHandler> {
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .times(times)
            .returning(move |_, _| claimed);
        Box::new(handler)
    }

    #[test]
    fn test_empty_chain_does_not_claim() {
        // テスト項目: ハンドラが 1 つもない場合はメッセージを処理しない
        // given (前提条件):
        let chain = ChainedHandler::new();
        let (sender, _client) = connected_pair();

        // when (操作):
        let handled = chain.handle(&sender, b"hello\n");

        // then (期待する結果):
        assert!(!handled);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_stops_at_first_claiming_handler() {
        // テスト項目: 最初に処理したハンドラで打ち切り、後続は呼ばれない
        // given (前提条件):
        let mut chain = ChainedHandler::new();
        chain.add(handler_returning(false, 1));
        chain.add(handler_returning(true, 1));
        chain.add(handler_returning(true, 0));
        let (sender, _client) = connected_pair();

        // when (操作):
        let handled = chain.handle(&sender, b"hello\n");

        // then (期待する結果):
        assert!(handled);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_unclaimed_when_every_handler_declines() {
        // テスト項目: 全てのハンドラが処理しなければ false を返す
        // given (前提条件):
        let mut chain = ChainedHandler::new();
        chain.add(handler_returning(false, 1));
        chain.add(handler_returning(false, 1));
        let (sender, _client) = connected_pair();

        // when (操作):
        let handled = chain.handle(&sender, b"hello\n");

        // then (期待する結果):
        assert!(!handled);
    }

    #[test]
    fn test_handlers_receive_sender_and_message() {
        // テスト項目: ハンドラには送信者とメッセージがそのまま渡される
        // given (前提条件):
        let (sender, _client) = connected_pair();
        let expected_id = sender.id();
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .withf(move |from, message| from.id() == expected_id && message == b"ping\n")
            .times(1)
            .returning(|_, _| true);
        let mut chain = ChainedHandler::new();
        chain.add(Box::new(handler));

        // when (操作):
        let handled = chain.handle(&sender, b"ping\n");

        // then (期待する結果):
        assert!(handled);
    }
}
