//! Chat client session: a reader thread for server output and a prompt loop
//! for user input.

use std::{
    io::{self, Write},
    sync::Arc,
    thread,
};

use kairo_server::{SocketError, TransportSocket};
use rustyline::{DefaultEditor, error::ReadlineError};

use crate::error::ClientError;

const QUIT_COMMAND: &str = "/quit";

/// Wire form of one line typed by the user.
pub fn outgoing_line(input: &str) -> Vec<u8> {
    let mut line = input.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
    line.push(b'\n');
    line
}

fn is_quit(input: &str) -> bool {
    input.trim() == QUIT_COMMAND
}

/// Connect to `host:port` and chat until the user quits or the server closes
/// the connection.
pub fn run_client(host: &str, port: u16) -> Result<(), ClientError> {
    let socket = Arc::new(TransportSocket::connect_to(host, port)?);
    tracing::info!("Connected to chat server at {}:{}", host, port);

    let reader = {
        let socket = Arc::clone(&socket);
        thread::Builder::new()
            .name("kairo-reader".to_string())
            .spawn(move || print_incoming(&socket))
            .map_err(ClientError::Spawn)?
    };

    let result = prompt_loop(&socket, &reader);

    // The server closes the connection after answering /quit.
    if reader.join().is_err() {
        tracing::warn!("Reader thread panicked");
    }
    socket.shutdown();
    result
}

fn prompt_loop(
    socket: &TransportSocket,
    reader: &thread::JoinHandle<()>,
) -> Result<(), ClientError> {
    let mut editor = DefaultEditor::new()?;

    loop {
        let input = match editor.readline("> ") {
            Ok(input) => input,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => QUIT_COMMAND.to_string(),
            Err(e) => {
                socket.shutdown();
                return Err(e.into());
            }
        };

        if reader.is_finished() {
            return Ok(());
        }

        if !input.trim().is_empty()
            && let Err(e) = editor.add_history_entry(input.as_str())
        {
            tracing::debug!("Failed to record history: {}", e);
        }

        match socket.send_all(&outgoing_line(&input)) {
            Ok(()) => {}
            Err(SocketError::SendFailed(e)) => {
                tracing::warn!("Server went away: {}", e);
                socket.shutdown();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if is_quit(&input) {
            return Ok(());
        }
    }
}

fn print_incoming(socket: &TransportSocket) {
    loop {
        match socket.receive() {
            Ok(chunk) if chunk.is_empty() => {
                println!("\nDisconnected from server.");
                break;
            }
            Ok(chunk) => {
                let mut stdout = io::stdout().lock();
                if stdout
                    .write_all(&chunk)
                    .and_then(|_| stdout.flush())
                    .is_err()
                {
                    break;
                }
            }
            Err(SocketError::SocketClosed) => break,
            Err(e) => {
                tracing::warn!("Receive error: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_line_appends_single_newline() {
        // テスト項目: 送信行の末尾には LF が 1 つだけ付く
        assert_eq!(outgoing_line("hello"), b"hello\n");
        assert_eq!(outgoing_line("hello\r\n"), b"hello\n");
        assert_eq!(outgoing_line(""), b"\n");
    }

    #[test]
    fn test_is_quit_ignores_surrounding_whitespace() {
        // テスト項目: 前後の空白を無視して /quit を判定する（大文字小文字は区別）
        assert!(is_quit("/quit"));
        assert!(is_quit("  /quit \n"));
        assert!(!is_quit("/QUIT"));
        assert!(!is_quit("/quit now"));
    }
}
