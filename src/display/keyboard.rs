// Keyboard control channel.
//
// Puts stdin into raw, nonblocking mode and maps single keystrokes to
// traffic-control commands. The saved terminal state is restored on drop,
// including on panic unwind.

use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::error::GtpLoadTestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    PauseTraffic,
    ResumeTraffic,
    RateUp,
    RateDown,
    RateDouble,
    RateHalve,
    Quit,
}

pub fn map_key(key: u8) -> Option<KeyCommand> {
    match key {
        b'p' => Some(KeyCommand::PauseTraffic),
        b'c' => Some(KeyCommand::ResumeTraffic),
        b'+' => Some(KeyCommand::RateUp),
        b'-' => Some(KeyCommand::RateDown),
        b'*' => Some(KeyCommand::RateDouble),
        b'/' => Some(KeyCommand::RateHalve),
        b'q' => Some(KeyCommand::Quit),
        _ => None,
    }
}

#[derive(Debug)]
pub struct Keyboard {
    saved: Termios,
}

impl Keyboard {
    /// Enter raw nonblocking mode. Fails when stdin is not a terminal
    /// (piped input, tests, headless runs).
    pub fn init() -> Result<Self, GtpLoadTestError> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Err(GtpLoadTestError::ConfigError("stdin is not a terminal".to_string()));
        }

        let saved = termios::tcgetattr(stdin.as_fd()).map_err(io_err)?;
        let mut raw = saved.clone();
        raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw).map_err(io_err)?;

        let flags = fcntl(stdin.as_raw_fd(), FcntlArg::F_GETFL).map_err(io_err)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(stdin.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(io_err)?;

        Ok(Self { saved })
    }

    /// One keystroke, if any is pending.
    pub fn poll_key(&mut self) -> Option<KeyCommand> {
        let stdin = std::io::stdin();
        let mut buf = [0u8; 1];
        match nix::unistd::read(stdin.as_raw_fd(), &mut buf) {
            Ok(1) => map_key(buf[0]),
            _ => None,
        }
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        let stdin = std::io::stdin();
        let _ = termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &self.saved);
        if let Ok(flags) = fcntl(stdin.as_raw_fd(), FcntlArg::F_GETFL) {
            let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
            let _ = fcntl(stdin.as_raw_fd(), FcntlArg::F_SETFL(flags));
        }
    }
}

fn io_err(errno: nix::errno::Errno) -> GtpLoadTestError {
    GtpLoadTestError::NetworkError(std::io::Error::from(errno))
}
