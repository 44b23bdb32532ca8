use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout};
use std::sync::mpsc::{channel, Receiver, Sender};

pub(crate) struct SmtProcess {
    child: Child,
    requests: Option<Sender<Vec<u8>>>,
    responses_buf_recv:
        Option<(BufReader<ChildStdout>, Receiver<(BufReader<ChildStdout>, Vec<String>)>)>,
    recv_requests: Sender<BufReader<ChildStdout>>,
}

const DONE: &str = "<<DONE>>";

/// A separate thread writes data to the solver over a pipe.
/// (Rust's documentation says you need a separate thread; otherwise, it lets the pipes deadlock.)
fn writer_thread(requests: Receiver<Vec<u8>>, mut smt_pipe_stdin: ChildStdin) {
    while let Ok(req) = requests.recv() {
        if smt_pipe_stdin
            .write_all(&req)
            .and_then(|_| writeln!(&smt_pipe_stdin))
            // Ask the solver to print DONE, so we know when it is done
            .and_then(|_| writeln!(&smt_pipe_stdin, "(echo \"{}\")", DONE))
            .and_then(|_| smt_pipe_stdin.flush())
            .is_err()
        {
            // The solver process died; the reader side reports the failure.
            break;
        }
    }
    // Exit when the other side closes the channel
}

/// A separate thread reads data from the solver over a pipe.
fn reader_thread(
    recv_requests: Receiver<BufReader<ChildStdout>>,
    responses: Sender<(BufReader<ChildStdout>, Vec<String>)>,
) {
    while let Ok(mut smt_pipe_stdout) = recv_requests.recv() {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            match smt_pipe_stdout.read_line(&mut line) {
                Ok(0) | Err(_) => {
                    // The solver process died; report what we have so the
                    // driver can fail with a ProverInteractionFailed.
                    lines.push("<<EOF>>".to_string());
                    let _ = responses.send((smt_pipe_stdout, lines));
                    return;
                }
                Ok(_) => {}
            }
            line = line.replace("\n", "").replace("\r", "");
            if line == DONE {
                if responses.send((smt_pipe_stdout, lines)).is_err() {
                    return;
                }
                break;
            }
            lines.push(line);
        }
    }
}

impl SmtProcess {
    pub(crate) fn launch(smt_executable_name: &str, args: &[String]) -> std::io::Result<Self> {
        let mut all_args: Vec<String> = vec!["-smt2".to_string(), "-in".to_string()];
        all_args.extend(args.iter().cloned());
        let mut child = std::process::Command::new(smt_executable_name)
            .args(&all_args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()?;
        let smt_pipe_stdout = BufReader::new(child.stdout.take().expect("take stdout"));
        let child_stdin = child.stdin.take().expect("take stdin");
        let (requests_sender, requests_receiver) = channel();
        let (responses_sender, responses_receiver) = channel();
        let (recv_responses_sender, recv_responses_receiver) = channel();
        std::thread::spawn(move || writer_thread(requests_receiver, child_stdin));
        std::thread::spawn(move || reader_thread(recv_responses_receiver, responses_sender));
        Ok(SmtProcess {
            child,
            requests: Some(requests_sender),
            responses_buf_recv: Some((smt_pipe_stdout, responses_receiver)),
            recv_requests: recv_responses_sender,
        })
    }

    /// Send commands to the solver, wait for it to acknowledge them, and return responses
    pub(crate) fn send_commands(&mut self, commands: Vec<u8>) -> Vec<String> {
        self.send_commands_async(commands).wait()
    }

    /// Send commands to the solver
    pub(crate) fn send_commands_async<'a>(&'a mut self, commands: Vec<u8>) -> CommandsHandle<'a> {
        // Send request to writer thread
        self.requests
            .as_ref()
            .expect("internal error: process already shut down")
            .send(commands)
            .expect("internal error: failed to send to writer thread");

        let (smt_pipe_stdout, receiver) = self
            .responses_buf_recv
            .take()
            .expect("internal error: wait on the CommandsHandle first");

        // Send read request to reader thread
        self.recv_requests
            .send(smt_pipe_stdout)
            .expect("internal error: failed to send to reader thread");

        CommandsHandle { smt_process: self, receiver }
    }

    /// Close stdin, force-terminate the child, and wait for it, giving up
    /// after roughly ten seconds.
    pub(crate) fn shutdown(&mut self) {
        // Dropping the request channel makes the writer thread exit,
        // which closes the solver's stdin.
        self.requests = None;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let _ = self.child.kill();
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) | Err(_) => break,
                Ok(None) => {
                    if std::time::Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
            }
        }
    }
}

pub struct CommandsHandle<'a> {
    smt_process: &'a mut SmtProcess,
    receiver: std::sync::mpsc::Receiver<(BufReader<ChildStdout>, Vec<String>)>,
}

impl<'a> CommandsHandle<'a> {
    pub fn wait(self) -> Vec<String> {
        let (smt_pipe_stdout, result) =
            self.receiver.recv().expect("internal error: solver reader thread failure");
        self.smt_process.responses_buf_recv = Some((smt_pipe_stdout, self.receiver));
        result
    }

    pub fn wait_timeout(self, timeout: std::time::Duration) -> Result<Vec<String>, Self> {
        match self.receiver.recv_timeout(timeout) {
            Ok((smt_pipe_stdout, result)) => {
                self.smt_process.responses_buf_recv = Some((smt_pipe_stdout, self.receiver));
                Ok(result)
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(self),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("internal error: solver reader thread disconnected")
            }
        }
    }
}
