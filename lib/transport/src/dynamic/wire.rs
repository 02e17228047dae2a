use std::fmt::Write as _;

/// Longest accepted command line; a longer line without a newline is a
/// protocol violation that corrupts framing.
pub(crate) const MAX_LINE: usize = 4096;

/// One parsed command line. The first letter of a command suffices on the
/// wire; unparseable arguments yield [`Command::Invalid`], which the
/// dispatcher logs and drops.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Register {
        location: String,
        host: String,
        port: u16,
    },
    Id {
        lid: i32,
        location: String,
        host: String,
        port: u16,
    },
    MyId {
        lid: i32,
    },
    Phase {
        phase: i32,
    },
    AllowSend {
        count: u64,
        elemsize: usize,
    },
    Data {
        len: usize,
        pos: Option<String>,
        bytes: Vec<u8>,
    },
    Help,
    Status,
    Quit,
    Kill,
    Comment,
    Invalid(String),
    Unknown(String),
}

pub(crate) fn parse(line: &str) -> Command {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Command::Unknown(line.to_string());
    };

    let invalid = || Command::Invalid(line.to_string());
    match cmd.as_bytes()[0] {
        b'r' => {
            let (Some(location), Some(host), Some(port)) =
                (words.next(), words.next(), words.next())
            else {
                return invalid();
            };
            match port.parse() {
                Ok(port) => Command::Register {
                    location: location.to_string(),
                    host: host.to_string(),
                    port,
                },
                Err(_) => invalid(),
            }
        }
        b'i' => {
            let (Some(lid), Some(location), Some(host), Some(port)) =
                (words.next(), words.next(), words.next(), words.next())
            else {
                return invalid();
            };
            match (lid.parse(), port.parse()) {
                (Ok(lid), Ok(port)) => Command::Id {
                    lid,
                    location: location.to_string(),
                    host: host.to_string(),
                    port,
                },
                _ => invalid(),
            }
        }
        b'm' => match words.next().map(str::parse) {
            Some(Ok(lid)) => Command::MyId { lid },
            _ => invalid(),
        },
        b'p' => match words.next().map(str::parse) {
            Some(Ok(phase)) => Command::Phase { phase },
            _ => invalid(),
        },
        b'a' => {
            let (Some(count), Some(elemsize)) = (words.next(), words.next()) else {
                return invalid();
            };
            match (count.parse(), elemsize.parse()) {
                (Ok(count), Ok(elemsize)) => Command::AllowSend { count, elemsize },
                _ => invalid(),
            }
        }
        b'd' => {
            let Some(Ok(len)) = words.next().map(str::parse::<usize>) else {
                return invalid();
            };
            let mut words = words.peekable();
            let pos = match words.peek() {
                Some(w) if w.starts_with('(') => Some(words.next().unwrap().to_string()),
                _ => None,
            };
            let mut bytes = Vec::with_capacity(len);
            for tok in words {
                match u8::from_str_radix(tok, 16) {
                    Ok(b) => bytes.push(b),
                    Err(_) => return invalid(),
                }
            }
            if bytes.len() != len {
                return invalid();
            }
            Command::Data { len, pos, bytes }
        }
        b'h' => Command::Help,
        b's' => Command::Status,
        b'q' => Command::Quit,
        b'k' => Command::Kill,
        b'#' => Command::Comment,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Append one `data` line (without trailing newline handling by caller):
/// `data <len> [(pos)] <hex>…\n`.
pub(crate) fn push_data_line(out: &mut String, bytes: &[u8], pos: Option<&str>) {
    write!(out, "data {}", bytes.len()).unwrap();
    if let Some(pos) = pos {
        write!(out, " {pos}").unwrap();
    }
    for b in bytes {
        write!(out, " {b:02x}").unwrap();
    }
    out.push('\n');
}
