// End-to-end tests for the hub: a real listener on 127.0.0.1 driven by
// blocking std clients, with the operator console called directly.
//
// Clients that need distinct hosts bind their own loopback address
// (127.0.0.x), which Linux routes to lo.

use super::activity::ActivityLog;
use super::admission::{PENDING_NOTICE, bind_listener, run_admission};
use super::moderation::ModerationStore;
use super::operator::{ACCEPTED_NOTICE, REJECTED_NOTICE};
use super::registry::ConnectionView;
use super::relay::MAX_LINE_BYTES;
use super::{Hub, HubOptions, run_compaction, system_line};
use crate::server::command_registry::CommandRegistry;
use crate::server::commands::init_commands;
use async_std::task;
use socket2::{Domain, Socket, Type};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

struct TestHub {
    hub: Arc<Hub>,
    addr: SocketAddr,
    console: CommandRegistry,
    _dir: TempDir,
}

impl TestHub {
    fn start(capacity: usize, entry_hint: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), capacity).unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = Hub::new(
            HubOptions {
                bind_addr: addr,
                capacity,
                entry_hint: entry_hint.map(str::to_string),
                settings_path: dir.path().join("config.toml"),
                offline_grace: Duration::from_secs(30),
            },
            ModerationStore::default(),
            ActivityLog::new(dir.path().join("log.txt")),
        );
        task::spawn(run_admission(Arc::clone(&hub), listener));
        let console = init_commands(Arc::clone(&hub));
        TestHub {
            hub,
            addr,
            console,
            _dir: dir,
        }
    }

    fn run(&self, cmdline: &str) -> String {
        self.console
            .handle(cmdline)
            .unwrap_or_else(|e| panic!("'{}' failed: {}", cmdline, e))
    }

    fn connect(&self) -> Client {
        Client::new(TcpStream::connect(self.addr).unwrap())
    }

    /// Connect from a chosen loopback host
    fn connect_from(&self, host: &str) -> Client {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let local: SocketAddr = format!("{}:0", host).parse().unwrap();
        socket.bind(&local.into()).unwrap();
        socket.connect(&self.addr.into()).unwrap();
        Client::new(socket.into())
    }

    /// Connect and wait until the hub has registered the connection
    fn join(&self, host: &str) -> Client {
        let client = self.connect_from(host);
        self.admitted(client)
    }

    /// Join with a tiny receive buffer, for a client that stops reading
    fn join_slow(&self, host: &str) -> Client {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        socket.set_recv_buffer_size(4096).unwrap();
        let local: SocketAddr = format!("{}:0", host).parse().unwrap();
        socket.bind(&local.into()).unwrap();
        socket.connect(&self.addr.into()).unwrap();
        self.admitted(Client::new(socket.into()))
    }

    fn admitted(&self, client: Client) -> Client {
        let peer = client.local_addr();
        assert!(wait_until(|| self.is_member(peer)), "{} was not admitted", peer);
        client
    }

    fn view(&self, peer: SocketAddr) -> Option<ConnectionView> {
        self.hub.connections().into_iter().find(|c| c.peer == peer)
    }

    fn is_member(&self, peer: SocketAddr) -> bool {
        self.hub.connections().iter().any(|c| c.peer == peer)
    }

    fn sent_by(&self, peer: SocketAddr) -> u64 {
        self.hub
            .connections()
            .iter()
            .find(|c| c.peer == peer)
            .map(|c| c.sent)
            .unwrap_or(0)
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.hub.request_shutdown();
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn new(stream: TcpStream) -> Self {
        stream.set_read_timeout(Some(WAIT)).unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.writer.local_addr().unwrap()
    }

    fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.flush().unwrap();
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line
    }

    /// A line if one arrives within `timeout`; None on silence
    fn try_read_line(&mut self, timeout: Duration) -> Option<String> {
        self.writer.set_read_timeout(Some(timeout)).unwrap();
        let mut line = String::new();
        let result = match self.reader.read_line(&mut line) {
            Ok(_) => Some(line),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
            Err(e) => panic!("read failed: {}", e),
        };
        self.writer.set_read_timeout(Some(WAIT)).unwrap();
        result
    }

    /// True once the hub has closed the connection
    fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        loop {
            match self.reader.read_line(&mut line) {
                Ok(0) => return true,
                Ok(_) => line.clear(),
                Err(e) if e.kind() == ErrorKind::ConnectionReset => return true,
                Err(_) => return false,
            }
        }
    }
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_message_reaches_every_member_including_sender() {
    let hub = TestHub::start(4, None);
    let mut alice = hub.join("127.0.0.1");
    let mut bob = hub.join("127.0.0.2");

    alice.send("alice: hello\n");
    assert_eq!(alice.read_line(), "alice: hello\n");
    assert_eq!(bob.read_line(), "alice: hello\n");

    let peer = alice.local_addr();
    assert!(wait_until(|| hub.sent_by(peer) == 1));
    let view = hub
        .hub
        .connections()
        .into_iter()
        .find(|c| c.peer == peer)
        .unwrap();
    assert_eq!(view.name, "alice");
    assert_eq!(view.sent, 1);

    let bob_view = hub
        .hub
        .connections()
        .into_iter()
        .find(|c| c.peer == bob.local_addr())
        .unwrap();
    assert_eq!(bob_view.name, "UNKNOWN");
    assert_eq!(bob_view.sent, 0);
}

#[test]
fn test_crlf_lines_are_relayed_without_terminator_noise() {
    let hub = TestHub::start(4, None);
    let mut carol = hub.join("127.0.0.1");

    carol.send("carol: windows line\r\n");
    assert_eq!(carol.read_line(), "carol: windows line\n");
}

#[test]
fn test_empty_lines_are_not_counted() {
    let hub = TestHub::start(4, None);
    let mut dave = hub.join("127.0.0.1");

    dave.send("\n\r\n");
    dave.send("dave: after blanks\n");
    assert_eq!(dave.read_line(), "dave: after blanks\n");
    assert_eq!(hub.sent_by(dave.local_addr()), 1);
}

#[test]
fn test_capacity_blocks_admission_until_a_sweep_frees_a_place() {
    let hub = TestHub::start(2, None);
    let first = hub.join("127.0.0.1");
    let _second = hub.join("127.0.0.2");

    let third = hub.connect_from("127.0.0.3");
    let third_peer = third.local_addr();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(hub.hub.active_count(), 2);
    assert!(!hub.is_member(third_peer));

    let first_peer = first.local_addr();
    drop(first);
    assert!(wait_until(|| {
        hub.hub
            .connections()
            .iter()
            .any(|c| c.peer == first_peer && !c.online)
    }));
    assert_eq!(hub.run("sweep"), "Removed 1 offline connection(s)");

    assert!(wait_until(|| hub.is_member(third_peer)));
    assert_eq!(hub.hub.active_count(), 2);
}

#[test]
fn test_periodic_compaction_removes_hung_up_connections() {
    let hub = TestHub::start(4, None);
    task::spawn(run_compaction(Arc::clone(&hub.hub), Duration::from_millis(50)));
    // Grace is 30s; the sweep must leave a fresh disconnect alone
    let gone = hub.join("127.0.0.1");
    let peer = gone.local_addr();
    drop(gone);
    assert!(wait_until(|| hub.hub.connections().iter().any(|c| c.peer == peer && !c.online)));
    thread::sleep(Duration::from_millis(200));
    assert!(hub.is_member(peer));

    // The host record outlives removal
    hub.run("sweep");
    assert!(!hub.is_member(peer));
    let table = hub.run("search ip ^127\\.0\\.0\\.1$");
    assert!(table.lines().nth(1).unwrap().starts_with("127.0.0.1"));
}

#[test]
fn test_join_request_reject_flow() {
    let hub = TestHub::start(4, None);
    hub.run("set EAP on");

    let mut client = hub.connect();
    assert_eq!(client.read_line(), system_line(PENDING_NOTICE));
    assert!(wait_until(|| hub.hub.with_state(|s| s.requests.pending_count() == 1)));
    assert_eq!(hub.hub.active_count(), 0);
    assert!(hub.run("requests").starts_with("<0> "));

    hub.run("reject 0");
    assert_eq!(client.read_line(), system_line(REJECTED_NOTICE));
    assert!(client.is_closed());
    assert_eq!(hub.hub.active_count(), 0);

    assert!(hub.console.handle("reject 0").is_err());
    assert!(hub.console.handle("accept 0").is_err());
    assert!(hub.run("requests").ends_with("rejected"));
}

#[test]
fn test_join_request_accept_flow() {
    let hub = TestHub::start(4, None);
    hub.run("set EAP on");

    let mut first = hub.connect();
    let mut second = hub.connect();
    assert_eq!(first.read_line(), system_line(PENDING_NOTICE));
    assert_eq!(second.read_line(), system_line(PENDING_NOTICE));
    assert!(wait_until(|| hub.hub.with_state(|s| s.requests.pending_count() == 2)));

    // One bad slot fails the whole batch
    assert!(hub.console.handle("accept 0 1 7").is_err());
    assert!(hub.console.handle("accept 0 0").is_err());
    assert_eq!(hub.hub.with_state(|s| s.requests.pending_count()), 2);

    hub.run("accept 0 1");
    assert_eq!(first.read_line(), system_line(ACCEPTED_NOTICE));
    assert_eq!(second.read_line(), system_line(ACCEPTED_NOTICE));
    assert!(wait_until(|| hub.hub.active_count() == 2));

    first.send("erin: in\n");
    assert_eq!(first.read_line(), "erin: in\n");
    assert_eq!(second.read_line(), "erin: in\n");
}

#[test]
fn test_banned_host_is_muted_and_refused() {
    let hub = TestHub::start(4, None);
    let mut observer = hub.join("127.0.0.1");
    let mut mallory = hub.join("127.0.0.5");

    hub.run("ban ip 127.0.0.5");
    assert_eq!(
        observer.read_line(),
        system_line("The operator banned user 127.0.0.5 (username: UNKNOWN).")
    );

    mallory.send("mallory: spam\n");
    thread::sleep(Duration::from_millis(200));
    observer.send("obs: ping\n");
    assert_eq!(observer.read_line(), "obs: ping\n");
    assert_eq!(mallory.try_read_line(Duration::from_millis(300)), None);
    assert_eq!(hub.sent_by(mallory.local_addr()), 0);

    // New connections from the banned host are dropped at admission
    let mut again = hub.connect_from("127.0.0.5");
    assert!(again.is_closed());
    assert!(!hub.is_member(again.local_addr()));

    hub.run("enable ip 127.0.0.5");
    assert_eq!(
        observer.read_line(),
        system_line("The operator lifted the ban on IP 127.0.0.5 (username: UNKNOWN).")
    );
    hub.join("127.0.0.5");
}

#[test]
fn test_filtered_messages_count_but_are_not_relayed() {
    let hub = TestHub::start(4, None);
    let mut frank = hub.join("127.0.0.1");
    hub.run("ban words spam");
    hub.run("ban length 20");
    assert_eq!(
        frank.read_line(),
        system_line("The operator limited messages to 20 characters.")
    );

    frank.send("frank: buy spam\n");
    frank.send("frank: this message is far too long\n");
    frank.send("frank: fine\n");
    assert_eq!(frank.read_line(), "frank: fine\n");

    let peer = frank.local_addr();
    assert!(wait_until(|| hub.sent_by(peer) == 3));
}

#[test]
fn test_search_orders_by_send_count() {
    let hub = TestHub::start(4, None);
    let mut quiet = hub.join("127.0.0.2");
    let mut chatty = hub.join("127.0.0.3");

    chatty.send("chatty: one\n");
    chatty.send("chatty: two\n");
    quiet.send("quiet: hi\n");
    for _ in 0..3 {
        chatty.read_line();
        quiet.read_line();
    }
    assert!(wait_until(|| hub.sent_by(chatty.local_addr()) == 2));

    let table = hub.run("search send_times 0");
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("127.0.0.3 | chatty"));
    assert!(lines[2].starts_with("127.0.0.2 | quiet"));

    let table = hub.run("search send_times 2");
    assert_eq!(table.lines().count(), 2);

    hub.run("ban ip 127.0.0.2");
    let table = hub.run("search banned");
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("127.0.0.2"));
    assert!(lines[1].ends_with("| true      | true      | 1"));

    let table = hub.run("search user ^cha");
    assert_eq!(table.lines().count(), 2);
}

#[test]
fn test_entry_hint_is_sent_first() {
    let hub = TestHub::start(4, Some("Be kind\n"));
    let mut client = hub.connect();
    assert_eq!(client.read_line(), "[operator-hint] Be kind\n");
}

#[test]
fn test_operator_broadcast() {
    let hub = TestHub::start(4, None);
    let mut grace = hub.join("127.0.0.1");

    let reply = hub.run("broadcast server restarts soon");
    assert!(reply.contains("delivered to 1 member(s)"));
    assert_eq!(grace.read_line(), "[operator-broadcast] server restarts soon\n");

    hub.run("broadcast   back  in\t5   minutes ");
    assert_eq!(grace.read_line(), "[operator-broadcast] back  in\t5   minutes\n");
}

#[test]
fn test_activity_log_records_events() {
    let hub = TestHub::start(4, None);
    let mut heidi = hub.join("127.0.0.1");
    heidi.send("heidi: logged\n");
    heidi.read_line();
    assert!(wait_until(|| hub.sent_by(heidi.local_addr()) == 1));

    let entries = hub.hub.activity().entries().join("\n");
    assert!(entries.contains("connected to server."));
    assert!(entries.contains("sent a message: heidi: logged"));

    hub.run("flush");
    assert_eq!(hub.hub.activity().pending(), 0);
    let written = std::fs::read_to_string(hub.hub.activity().path()).unwrap();
    assert!(written.contains("heidi: logged"));
}

#[test]
fn test_failed_send_marks_only_that_member_offline() {
    let hub = TestHub::start(4, None);
    let line = format!("{}\n", "x".repeat(200_000));

    let mut reader = hub.join("127.0.0.1");
    let mut stuck = hub.join_slow("127.0.0.2");
    let stuck_peer = stuck.local_addr();

    let expected = line.clone();
    let drained = thread::spawn(move || {
        let mut count = 0;
        loop {
            let received = reader.read_line();
            if received == "hub: next\n" {
                return count;
            }
            assert_eq!(received, expected);
            count += 1;
        }
    });

    let mut sent = 0;
    let mut failure = None;
    while failure.is_none() && sent < 500 {
        let report = task::block_on(hub.hub.broadcast(&line));
        sent += 1;
        if !report.failed.is_empty() {
            failure = Some(report);
        }
    }
    let report = failure.expect("the stuck member never failed a send");
    assert_eq!(report.failed, vec![stuck_peer]);
    assert_eq!(report.delivered, 1);

    let view = hub.view(stuck_peer).expect("stuck member was removed");
    assert!(!view.online);

    // Later broadcasts skip the member whose stream may hold a partial line
    let report = task::block_on(hub.hub.broadcast("hub: next\n"));
    assert_eq!(report.delivered, 1);
    assert!(report.failed.is_empty());
    assert_eq!(drained.join().unwrap(), sent);

    // The stuck member reads whole lines, at most one cut-off line, then EOF
    let mut received = Vec::new();
    stuck.reader.read_to_end(&mut received).unwrap();
    let received = String::from_utf8(received).unwrap();
    assert!(!received.contains("hub"));
    let mut lines: Vec<&str> = received.split_inclusive('\n').collect();
    if let Some(last) = lines.last() {
        if !last.ends_with('\n') {
            assert!(last.chars().all(|c| c == 'x'));
            lines.pop();
        }
    }
    assert!(lines.iter().all(|l| *l == line));
    assert!(hub.is_member(stuck_peer));
}

#[test]
fn test_join_announcement_follows_sem_flag() {
    let hub = TestHub::start(4, None);
    let notices = hub.hub.operator_notices();

    let _quiet = hub.join("127.0.0.1");
    assert!(notices.try_recv().is_err());

    hub.run("set SEM on");
    let loud = hub.join("127.0.0.2");
    assert_eq!(
        notices.try_recv().unwrap(),
        format!("User {} joined the chat room!", loud.local_addr())
    );

    hub.run("set SEM off");
    let _quiet_again = hub.join("127.0.0.3");
    assert!(notices.try_recv().is_err());
}

#[test]
fn test_join_request_is_announced_to_operator() {
    let hub = TestHub::start(4, None);
    let notices = hub.hub.operator_notices();
    hub.run("set EAP on");

    let client = hub.connect_from("127.0.0.1");
    let peer = client.local_addr();
    assert!(wait_until(|| !notices.is_empty()));
    assert_eq!(
        notices.try_recv().unwrap(),
        format!("<0> User {} requests to join the chat room, please respond.", peer)
    );
}

#[test]
fn test_line_of_exactly_the_limit_is_relayed() {
    let hub = TestHub::start(4, None);
    let mut kim = hub.join("127.0.0.1");

    let message = format!("kim: {}", "y".repeat(MAX_LINE_BYTES - 5));
    kim.send(&format!("{}\r\n", message));
    assert_eq!(kim.read_line(), format!("{}\n", message));
    assert!(hub.is_member(kim.local_addr()));
}
