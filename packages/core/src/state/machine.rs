// Конечный автомат сокета сопряжения
//
// Idle → Open → HelloReceived → Challenged → RequestSent → ActionReceived
//   → (TransferInit → Receiving → Complete)? → ClosedSuccess | ClosedError

use crate::protocol::messages::Action;
use crate::utils::error::{PairingError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    Idle,
    Open,
    HelloReceived,
    Challenged,
    RequestSent,
    ActionReceived,
    TransferInit,
    Receiving,
    Complete,
    ClosedSuccess,
    ClosedError,
}

impl SocketState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SocketState::ClosedSuccess | SocketState::ClosedError)
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct SocketStateMachine {
    state: SocketState,
    transfer_expected: bool,
}

impl SocketStateMachine {
    pub fn new() -> Self {
        Self {
            state: SocketState::Idle,
            transfer_expected: false,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn transfer_expected(&self) -> bool {
        self.transfer_expected
    }

    /// Куда ведёт входящий фрейм из текущего состояния
    pub fn next_state(&self, action: Action) -> Result<SocketState> {
        use SocketState::*;

        let next = match (self.state, action) {
            (Open, Action::Hello) => HelloReceived,
            (HelloReceived, Action::Challenge) => Challenged,
            (RequestSent, Action::PullRequestAction) => ActionReceived,
            (ActionReceived, Action::InitTransfer) if self.transfer_expected => TransferInit,
            (TransferInit, Action::TransferChunk) | (Receiving, Action::TransferChunk) => Receiving,
            (ActionReceived, Action::CloseWithSuccess) if !self.transfer_expected => ClosedSuccess,
            (Complete, Action::CloseWithSuccess) => ClosedSuccess,
            (state, Action::CloseWithError) if !state.is_terminal() => ClosedError,
            (state, action) => return Err(PairingError::unexpected(action, state)),
        };
        Ok(next)
    }

    /// Применить входящий фрейм. Недопустимый фрейм не меняет состояние.
    pub fn on_inbound(&mut self, action: Action) -> Result<SocketState> {
        let next = self.next_state(action)?;
        self.state = next;
        Ok(next)
    }

    pub fn on_socket_open(&mut self) -> Result<SocketState> {
        if self.state != SocketState::Idle {
            return Err(PairingError::unexpected("open", self.state));
        }
        self.state = SocketState::Open;
        Ok(self.state)
    }

    /// Клиент отправил PULL_REQUEST
    pub fn on_request_sent(&mut self) -> Result<SocketState> {
        if self.state != SocketState::Challenged {
            return Err(PairingError::unexpected(Action::PullRequest, self.state));
        }
        self.state = SocketState::RequestSent;
        Ok(self.state)
    }

    /// Вызывается после PULL_REQUEST_ACTION
    pub fn expect_transfer(&mut self, expected: bool) {
        self.transfer_expected = expected;
    }

    /// Все чанки получены
    pub fn on_transfer_complete(&mut self) -> Result<SocketState> {
        if self.state != SocketState::Receiving {
            return Err(PairingError::unexpected("transferComplete", self.state));
        }
        self.state = SocketState::Complete;
        Ok(self.state)
    }

    /// Терминальная ошибка. Успешное закрытие не перезаписывается.
    pub fn fail(&mut self) -> SocketState {
        if self.state != SocketState::ClosedSuccess {
            self.state = SocketState::ClosedError;
        }
        self.state
    }
}

impl Default for SocketStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(actions: &[Action]) -> SocketStateMachine {
        let mut machine = SocketStateMachine::new();
        machine.on_socket_open().unwrap();
        for action in actions {
            machine.on_inbound(*action).unwrap();
        }
        machine
    }

    #[test]
    fn test_happy_path_without_transfer() {
        let mut machine = machine_in(&[Action::Hello, Action::Challenge]);
        machine.on_request_sent().unwrap();
        machine.on_inbound(Action::PullRequestAction).unwrap();
        assert_eq!(
            machine.on_inbound(Action::CloseWithSuccess).unwrap(),
            SocketState::ClosedSuccess
        );
    }

    #[test]
    fn test_happy_path_with_transfer() {
        let mut machine = machine_in(&[Action::Hello, Action::Challenge]);
        machine.on_request_sent().unwrap();
        machine.on_inbound(Action::PullRequestAction).unwrap();
        machine.expect_transfer(true);

        // Без передачи успех недопустим
        assert!(machine.next_state(Action::CloseWithSuccess).is_err());

        machine.on_inbound(Action::InitTransfer).unwrap();
        machine.on_inbound(Action::TransferChunk).unwrap();
        machine.on_inbound(Action::TransferChunk).unwrap();
        machine.on_transfer_complete().unwrap();
        assert_eq!(
            machine.on_inbound(Action::CloseWithSuccess).unwrap(),
            SocketState::ClosedSuccess
        );
    }

    #[test]
    fn test_out_of_order_rejected_without_mutation() {
        let mut machine = machine_in(&[Action::Hello]);
        let result = machine.on_inbound(Action::PullRequestAction);
        assert!(matches!(result, Err(PairingError::UnexpectedAction { .. })));
        assert_eq!(machine.state(), SocketState::HelloReceived);
    }

    #[test]
    fn test_inbound_pull_request_is_unexpected() {
        let mut machine = machine_in(&[Action::Hello, Action::Challenge]);
        assert!(machine.on_inbound(Action::PullRequest).is_err());
    }

    #[test]
    fn test_outbound_only_actions_rejected() {
        let mut machine = machine_in(&[Action::Hello, Action::Challenge]);
        machine.on_request_sent().unwrap();
        machine.on_inbound(Action::PullRequestAction).unwrap();
        assert!(machine.on_inbound(Action::PullRequestCompleted).is_err());
        assert!(machine.on_inbound(Action::InitTransferConfirmed).is_err());
    }

    #[test]
    fn test_close_with_error_from_any_live_state() {
        let mut machine = machine_in(&[]);
        assert_eq!(
            machine.on_inbound(Action::CloseWithError).unwrap(),
            SocketState::ClosedError
        );
        assert!(machine.on_inbound(Action::CloseWithError).is_err());
    }

    #[test]
    fn test_hello_before_open() {
        let mut machine = SocketStateMachine::new();
        assert!(machine.on_inbound(Action::Hello).is_err());
        assert_eq!(machine.state(), SocketState::Idle);
    }
}
