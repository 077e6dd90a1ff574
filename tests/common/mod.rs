//! In-process fake store node for integration tests
#![allow(dead_code)]

use redis::Value;
use shardkv::NodeConfig;
use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Store = Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>;

/// Node served from background threads, one per accepted connection
pub struct FakeNode {
    pub port: u16,
    info: Arc<Mutex<String>>,
    store: Store,
    stopped: Arc<AtomicBool>,
}

impl FakeNode {
    /// Start a node answering `INFO replication` with `info`
    pub async fn start(info: String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let info = Arc::new(Mutex::new(info));
        let store: Store = Arc::default();
        let stopped = Arc::new(AtomicBool::new(false));

        {
            let info = info.clone();
            let store = store.clone();
            let stopped = stopped.clone();
            std::thread::spawn(move || {
                for socket in listener.incoming() {
                    if stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    let Ok(socket) = socket else { return };
                    let info = info.clone();
                    let store = store.clone();
                    std::thread::spawn(move || serve(socket, info, store));
                }
            });
        }

        Self {
            port,
            info,
            store,
            stopped,
        }
    }

    pub async fn master() -> Self {
        Self::start(master_info()).await
    }

    pub async fn replica_of(master_port: u16) -> Self {
        Self::start(replica_info(master_port)).await
    }

    pub fn set_info(&self, info: String) {
        *self.info.lock().unwrap() = info;
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.store
            .lock()
            .unwrap()
            .get(key.as_bytes())
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    pub fn config(&self, group_id: u32) -> NodeConfig {
        NodeConfig::new("127.0.0.1", self.port, group_id)
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        // Wake the accept loop so it sees the flag
        self.stopped.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(("127.0.0.1", self.port));
    }
}

pub fn master_info() -> String {
    "# Replication\r\nrole:master\r\nconnected_slaves:1\r\n".to_string()
}

pub fn replica_info(master_port: u16) -> String {
    format!(
        "# Replication\r\nrole:slave\r\nmaster_host:127.0.0.1\r\nmaster_port:{}\r\nmaster_link_status:up\r\n",
        master_port
    )
}

/// A port with nothing listening on it
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

enum Reply {
    Status(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
}

fn serve(mut socket: TcpStream, info: Arc<Mutex<String>>, store: Store) {
    let Ok(mut reader) = socket.try_clone() else {
        return;
    };
    let mut parser = redis::Parser::new();
    while let Ok(Value::Array(items)) = parser.parse_value(&mut reader) {
        let args: Vec<Vec<u8>> = items
            .into_iter()
            .filter_map(|item| match item {
                Value::BulkString(bytes) => Some(bytes),
                _ => None,
            })
            .collect();
        let reply = handle(&args, &info, &store);
        if socket.write_all(&encode(reply)).is_err() {
            return;
        }
    }
}

fn handle(args: &[Vec<u8>], info: &Mutex<String>, store: &Store) -> Reply {
    let Some((name, args)) = args.split_first() else {
        return Reply::Error("ERR empty command".into());
    };
    let info_text = info.lock().unwrap().clone();
    let is_master = info_text.contains("role:master");
    let mut store = store.lock().unwrap();

    match String::from_utf8_lossy(name).to_uppercase().as_str() {
        "PING" => Reply::Status("PONG"),
        // Connection setup sent by the client library
        "CLIENT" | "SELECT" => Reply::Status("OK"),
        "ECHO" => Reply::Bulk(args[0].clone()),
        "INFO" => Reply::Bulk(info_text.into_bytes()),
        "GET" => store
            .get(&args[0])
            .cloned()
            .map(Reply::Bulk)
            .unwrap_or(Reply::Nil),
        "SET" if !is_master => {
            Reply::Error("READONLY You can't write against a read only replica.".into())
        }
        "SET" => {
            store.insert(args[0].clone(), args[1].clone());
            Reply::Status("OK")
        }
        "DEL" => Reply::Integer(store.remove(&args[0]).is_some() as i64),
        "EXISTS" => Reply::Integer(store.contains_key(&args[0]) as i64),
        other => Reply::Error(format!("ERR unknown command '{}'", other)),
    }
}

fn encode(reply: Reply) -> Vec<u8> {
    match reply {
        Reply::Status(s) => format!("+{}\r\n", s).into_bytes(),
        Reply::Error(e) => format!("-{}\r\n", e).into_bytes(),
        Reply::Integer(i) => format!(":{}\r\n", i).into_bytes(),
        Reply::Nil => b"$-1\r\n".to_vec(),
        Reply::Bulk(b) => {
            let mut out = format!("${}\r\n", b.len()).into_bytes();
            out.extend_from_slice(&b);
            out.extend_from_slice(b"\r\n");
            out
        }
    }
}
