use crate::circuit::{Circuit, CircuitError};
use crate::crypto::{is_usable_modulus, PrivateKey, PublicKey};
use crate::directory::RouterId;
use onionnet_common::{PeerAddress, ADDRESS_SEPARATOR};
use std::fmt;
use std::str::FromStr;

/// Prefix of every error reply
pub const ERROR_PREFIX: &str = "ERROR:";

/// Field separator in a client registration
pub const REGISTRATION_SEPARATOR: &str = "::";

/// Characters a username may not contain; they delimit other replies
const RESERVED_NAME_CHARS: [char; 4] = [':', ',', '|', ';'];

// ============================================================================
// Connection types
// ============================================================================

/// First frame on every connection to the Master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Router,
    Client,
    UnregisterRouter,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "ROUTER",
            Self::Client => "CLIENT",
            Self::UnregisterRouter => "UNREGISTER_ROUTER",
        }
    }
}

impl FromStr for ConnectionType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ROUTER" => Ok(Self::Router),
            "CLIENT" => Ok(Self::Client),
            "UNREGISTER_ROUTER" => Ok(Self::UnregisterRouter),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error codes
// ============================================================================

/// Codes carried in `ERROR:<CODE>` replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnknownType,
    InvalidFormat,
    InvalidData,
    StoreUnavailable,
    TargetNotFound,
    NoRoutersAvailable,
    UnknownCommand,
    RouterNotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidData => "INVALID_DATA",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::TargetNotFound => "TARGET_NOT_FOUND",
            Self::NoRoutersAvailable => "NO_ROUTERS_AVAILABLE",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
            Self::RouterNotFound => "ROUTER_NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        let code = match s.trim() {
            "UNKNOWN_TYPE" => Self::UnknownType,
            "INVALID_FORMAT" => Self::InvalidFormat,
            "INVALID_DATA" => Self::InvalidData,
            "STORE_UNAVAILABLE" => Self::StoreUnavailable,
            "TARGET_NOT_FOUND" => Self::TargetNotFound,
            "NO_ROUTERS_AVAILABLE" => Self::NoRoutersAvailable,
            "UNKNOWN_COMMAND" => Self::UnknownCommand,
            "ROUTER_NOT_FOUND" => Self::RouterNotFound,
            "INTERNAL" => Self::Internal,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&CircuitError> for ErrorCode {
    fn from(e: &CircuitError) -> Self {
        match e {
            CircuitError::TargetNotFound(_) => Self::TargetNotFound,
            CircuitError::NoRoutersAvailable => Self::NoRoutersAvailable,
            CircuitError::InvalidWire(_) => Self::Internal,
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Router registration request: `ip;port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterRegistration {
    pub address: PeerAddress,
}

impl RouterRegistration {
    pub fn to_wire(&self) -> String {
        self.address.to_string()
    }

    pub fn from_wire(s: &str) -> Result<Self, ProtocolError> {
        let address = PeerAddress::from_wire(s.trim())
            .map_err(|e| ProtocolError::InvalidFormat(e.to_string()))?;
        Ok(Self { address })
    }
}

/// Router registration reply: `id;d;n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterGrant {
    pub id: RouterId,
    pub private_key: PrivateKey,
}

impl RouterGrant {
    pub fn to_wire(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.id,
            self.private_key.d,
            self.private_key.n,
            sep = ADDRESS_SEPARATOR
        )
    }

    /// Parse the Master's reply, surfacing `ERROR:` replies as `Rejected`
    pub fn from_reply(s: &str) -> Result<Self, ProtocolError> {
        let s = check_rejection(s)?;
        let unexpected = || ProtocolError::UnexpectedReply(s.to_string());

        let fields: Vec<&str> = s.split(ADDRESS_SEPARATOR).collect();
        let [id, d, n] = fields.as_slice() else {
            return Err(unexpected());
        };

        let n = n.trim().parse().map_err(|_| unexpected())?;
        if !is_usable_modulus(n) {
            return Err(unexpected());
        }

        Ok(Self {
            id: id.trim().parse().map_err(|_| unexpected())?,
            private_key: PrivateKey::new(d.trim().parse().map_err(|_| unexpected())?, n),
        })
    }
}

/// Client registration request: `username::ip::port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRegistration {
    pub username: String,
    pub address: PeerAddress,
}

impl ClientRegistration {
    pub fn to_wire(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.username,
            self.address.host,
            self.address.port,
            sep = REGISTRATION_SEPARATOR
        )
    }

    /// The username is everything before the first `::` and the port
    /// everything after the last, so an IPv6 host may contain `::` itself.
    pub fn from_wire(s: &str) -> Result<Self, ProtocolError> {
        let s = s.trim();
        let (username, rest) = s
            .split_once(REGISTRATION_SEPARATOR)
            .ok_or_else(|| ProtocolError::InvalidFormat(s.to_string()))?;
        let (host, port) = rest
            .rsplit_once(REGISTRATION_SEPARATOR)
            .ok_or_else(|| ProtocolError::InvalidData(s.to_string()))?;

        if !is_valid_username(username) {
            return Err(ProtocolError::InvalidData(format!("username {:?}", username)));
        }

        let host = host.trim();
        if host.is_empty() {
            return Err(ProtocolError::InvalidData(s.to_string()));
        }

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ProtocolError::InvalidData(s.to_string()))?;

        Ok(Self {
            username: username.to_string(),
            address: PeerAddress::new(host, port),
        })
    }
}

/// Client registration reply `OK:e:n`, as the public key it carries
pub fn parse_client_accept(s: &str) -> Result<PublicKey, ProtocolError> {
    let s = check_rejection(s)?;
    let unexpected = || ProtocolError::UnexpectedReply(s.to_string());

    let mut parts = s.splitn(3, ':');
    if parts.next() != Some("OK") {
        return Err(unexpected());
    }
    let e = parts.next().and_then(|v| v.parse().ok()).ok_or_else(unexpected)?;
    let n = parts
        .next()
        .and_then(|v| v.parse().ok())
        .filter(|&n| is_usable_modulus(n))
        .ok_or_else(unexpected)?;

    Ok(PublicKey::new(e, n))
}

/// Usernames are non-empty and free of whitespace and reply delimiters
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || RESERVED_NAME_CHARS.contains(&c))
}

// ============================================================================
// Command loop
// ============================================================================

/// A command on a registered client's connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Get(String),
    Path {
        sender: String,
        hops: i64,
        target: String,
    },
    Ping,
    Quit,
}

impl Command {
    pub fn to_wire(&self) -> String {
        match self {
            Self::List => "LIST".to_string(),
            Self::Get(user) => format!("GET:{}", user),
            Self::Path {
                sender,
                hops,
                target,
            } => format!("PATH:{}:{}:{}", sender, hops, target),
            Self::Ping => "PING".to_string(),
            Self::Quit => "QUIT".to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::List => "LIST",
            Self::Get(_) => "GET",
            Self::Path { .. } => "PATH",
            Self::Ping => "PING",
            Self::Quit => "QUIT",
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (verb, args) = match s.split_once(':') {
            Some((verb, args)) => (verb, Some(args)),
            None => (s, None),
        };

        match (verb, args) {
            ("LIST", None) => Ok(Self::List),
            ("PING", None) => Ok(Self::Ping),
            ("QUIT", None) => Ok(Self::Quit),
            ("GET", Some(user)) => Ok(Self::Get(user.trim().to_string())),
            ("PATH", Some(args)) => {
                let invalid = || ProtocolError::InvalidFormat(s.to_string());
                let mut fields = args.splitn(3, ':');
                let sender = fields.next().ok_or_else(invalid)?;
                let hops = fields.next().ok_or_else(invalid)?;
                let target = fields.next().ok_or_else(invalid)?;

                Ok(Self::Path {
                    sender: sender.trim().to_string(),
                    hops: hops.trim().parse().map_err(|_| invalid())?,
                    target: target.trim().to_string(),
                })
            }
            ("GET", None) | ("PATH", None) => Err(ProtocolError::InvalidFormat(s.to_string())),
            _ => Err(ProtocolError::UnknownCommand(s.to_string())),
        }
    }
}

/// Master replies, rendered with `Display`
#[derive(Debug, Clone)]
pub enum Reply {
    Online(Vec<String>),
    User {
        address: PeerAddress,
        public_key: PublicKey,
    },
    NotFound,
    Path(Circuit),
    Pong,
    Registered(PublicKey),
    RouterGranted(RouterGrant),
    Ok,
    Error(ErrorCode),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online(users) => write!(f, "ONLINE:{}", users.join(",")),
            Self::User {
                address,
                public_key,
            } => write!(
                f,
                "USER:{}:{}:{}:{}",
                address.host, address.port, public_key.e, public_key.n
            ),
            Self::NotFound => f.write_str("NOT_FOUND"),
            Self::Path(circuit) => f.write_str(&circuit.to_wire()),
            Self::Pong => f.write_str("PONG"),
            Self::Registered(key) => write!(f, "OK:{}:{}", key.e, key.n),
            Self::RouterGranted(grant) => f.write_str(&grant.to_wire()),
            Self::Ok => f.write_str("OK"),
            Self::Error(code) => write!(f, "{}{}", ERROR_PREFIX, code),
        }
    }
}

impl From<ErrorCode> for Reply {
    fn from(code: ErrorCode) -> Self {
        Self::Error(code)
    }
}

// ============================================================================
// Client-side reply parsing
// ============================================================================

/// `ONLINE:a,b,c` into names; an empty list is valid
pub fn parse_online(s: &str) -> Result<Vec<String>, ProtocolError> {
    let s = check_rejection(s)?;
    let list = s
        .strip_prefix("ONLINE:")
        .ok_or_else(|| ProtocolError::UnexpectedReply(s.to_string()))?;

    Ok(list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

/// `USER:ip:port:e:n` or `NOT_FOUND`. Fields are taken from the right so the
/// host may contain `:`.
pub fn parse_user(s: &str) -> Result<Option<(PeerAddress, PublicKey)>, ProtocolError> {
    let s = check_rejection(s)?;
    if s == "NOT_FOUND" {
        return Ok(None);
    }

    let unexpected = || ProtocolError::UnexpectedReply(s.to_string());
    let body = s.strip_prefix("USER:").ok_or_else(unexpected)?;

    let mut fields = body.rsplitn(4, ':');
    let n = fields
        .next()
        .and_then(|v| v.parse().ok())
        .filter(|&n| is_usable_modulus(n))
        .ok_or_else(unexpected)?;
    let e = fields.next().and_then(|v| v.parse().ok()).ok_or_else(unexpected)?;
    let port = fields.next().and_then(|v| v.parse().ok()).ok_or_else(unexpected)?;
    let host = fields.next().filter(|h| !h.is_empty()).ok_or_else(unexpected)?;

    Ok(Some((PeerAddress::new(host, port), PublicKey::new(e, n))))
}

/// PATH reply into a circuit, with typed failures for the two expected errors
pub fn parse_path(s: &str) -> Result<Circuit, ProtocolError> {
    let s = check_rejection(s)?;
    Circuit::from_wire(s).map_err(|_| ProtocolError::UnexpectedReply(s.to_string()))
}

fn check_rejection(s: &str) -> Result<&str, ProtocolError> {
    let s = s.trim();
    match s.strip_prefix(ERROR_PREFIX) {
        Some(code) => Err(ProtocolError::Rejected(code.to_string())),
        None => Ok(s),
    }
}

/// Protocol errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown connection type: {0:?}")]
    UnknownType(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("Rejected by peer: {0}")]
    Rejected(String),

    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(String),
}

impl ProtocolError {
    /// Code to send back for a request that failed to parse
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownType(_) => ErrorCode::UnknownType,
            Self::InvalidFormat(_) => ErrorCode::InvalidFormat,
            Self::InvalidData(_) => ErrorCode::InvalidData,
            Self::UnknownCommand(_) => ErrorCode::UnknownCommand,
            Self::Rejected(_) | Self::UnexpectedReply(_) => ErrorCode::Internal,
        }
    }

    /// The code of an `ERROR:` reply, if this is one
    pub fn rejection_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Rejected(code) => ErrorCode::from_wire(code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::HopDescriptor;

    #[test]
    fn test_connection_type() {
        assert_eq!("ROUTER".parse::<ConnectionType>().unwrap(), ConnectionType::Router);
        assert_eq!(
            " UNREGISTER_ROUTER\n".parse::<ConnectionType>().unwrap(),
            ConnectionType::UnregisterRouter
        );
        let err = "HELLO".parse::<ConnectionType>().unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownType);
    }

    #[test]
    fn test_router_registration() {
        let reg = RouterRegistration::from_wire("127.0.0.1;5001").unwrap();
        assert_eq!(reg.address, PeerAddress::new("127.0.0.1", 5001));
        assert_eq!(reg.to_wire(), "127.0.0.1;5001");

        let err = RouterRegistration::from_wire("127.0.0.1:5001").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFormat);
    }

    #[test]
    fn test_router_grant() {
        let grant = RouterGrant {
            id: 4,
            private_key: PrivateKey::new(2753, 3233),
        };
        assert_eq!(grant.to_wire(), "4;2753;3233");
        assert_eq!(RouterGrant::from_reply("4;2753;3233").unwrap(), grant);

        let err = RouterGrant::from_reply("ERROR:STORE_UNAVAILABLE").unwrap_err();
        assert_eq!(err.rejection_code(), Some(ErrorCode::StoreUnavailable));
        assert!(matches!(
            RouterGrant::from_reply("4;2753"),
            Err(ProtocolError::UnexpectedReply(_))
        ));
        assert!(matches!(
            RouterGrant::from_reply("1;7;0"),
            Err(ProtocolError::UnexpectedReply(_))
        ));
    }

    #[test]
    fn test_client_registration() {
        let reg = ClientRegistration::from_wire("alice::127.0.0.1::7001").unwrap();
        assert_eq!(reg.username, "alice");
        assert_eq!(reg.address, PeerAddress::new("127.0.0.1", 7001));
        assert_eq!(reg.to_wire(), "alice::127.0.0.1::7001");

        let v6 = ClientRegistration::from_wire("bob::::1::7002").unwrap();
        assert_eq!(v6.address.host, "::1");
    }

    #[test]
    fn test_client_registration_errors() {
        let code = |s: &str| ClientRegistration::from_wire(s).unwrap_err().code();

        assert_eq!(code("alice;127.0.0.1;7001"), ErrorCode::InvalidFormat);
        assert_eq!(code("alice::127.0.0.1"), ErrorCode::InvalidData);
        assert_eq!(code("::127.0.0.1::7001"), ErrorCode::InvalidData);
        assert_eq!(code("al ice::127.0.0.1::7001"), ErrorCode::InvalidData);
        assert_eq!(code("a,b::127.0.0.1::7001"), ErrorCode::InvalidData);
        assert_eq!(code("alice::127.0.0.1::port"), ErrorCode::InvalidData);
        assert_eq!(code("alice::::7001"), ErrorCode::InvalidData);
    }

    #[test]
    fn test_client_accept() {
        assert_eq!(parse_client_accept("OK:3:3233").unwrap(), PublicKey::new(3, 3233));
        assert_eq!(
            parse_client_accept("ERROR:INVALID_DATA").unwrap_err().rejection_code(),
            Some(ErrorCode::InvalidData)
        );
        assert!(parse_client_accept("OK:3").is_err());
        assert!(parse_client_accept("OK:3:0").is_err());
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!("LIST".parse::<Command>().unwrap(), Command::List);
        assert_eq!("PING\n".parse::<Command>().unwrap(), Command::Ping);
        assert_eq!("QUIT".parse::<Command>().unwrap(), Command::Quit);
        assert_eq!("GET:bob".parse::<Command>().unwrap(), Command::Get("bob".into()));
        assert_eq!(
            "PATH:alice:-2:bob".parse::<Command>().unwrap(),
            Command::Path {
                sender: "alice".into(),
                hops: -2,
                target: "bob".into(),
            }
        );
    }

    #[test]
    fn test_command_errors() {
        let code = |s: &str| s.parse::<Command>().unwrap_err().code();

        assert_eq!(code("PATH:alice:two:bob"), ErrorCode::InvalidFormat);
        assert_eq!(code("PATH:alice:2"), ErrorCode::InvalidFormat);
        assert_eq!(code("GET"), ErrorCode::InvalidFormat);
        assert_eq!(code("DANCE"), ErrorCode::UnknownCommand);
        assert_eq!(code("LIST:extra"), ErrorCode::UnknownCommand);
    }

    #[test]
    fn test_command_wire_roundtrip() {
        let path = Command::Path {
            sender: "alice".into(),
            hops: 3,
            target: "bob".into(),
        };
        assert_eq!(path.to_wire(), "PATH:alice:3:bob");
        assert_eq!(path.to_wire().parse::<Command>().unwrap(), path);
    }

    #[test]
    fn test_reply_rendering() {
        assert_eq!(Reply::Online(vec!["bob".into(), "carol".into()]).to_string(), "ONLINE:bob,carol");
        assert_eq!(Reply::Online(vec![]).to_string(), "ONLINE:");
        assert_eq!(Reply::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(Reply::Pong.to_string(), "PONG");
        assert_eq!(Reply::Registered(PublicKey::new(3, 10)).to_string(), "OK:3:10");
        assert_eq!(
            Reply::from(ErrorCode::NoRoutersAvailable).to_string(),
            "ERROR:NO_ROUTERS_AVAILABLE"
        );
        assert_eq!(
            Reply::User {
                address: PeerAddress::new("127.0.0.1", 7001),
                public_key: PublicKey::new(5, 99),
            }
            .to_string(),
            "USER:127.0.0.1:7001:5:99"
        );
    }

    #[test]
    fn test_parse_online() {
        assert_eq!(parse_online("ONLINE:bob,carol").unwrap(), vec!["bob", "carol"]);
        assert!(parse_online("ONLINE:").unwrap().is_empty());
        assert!(parse_online("PONG").is_err());
    }

    #[test]
    fn test_parse_user() {
        let (addr, key) = parse_user("USER:127.0.0.1:7001:5:99").unwrap().unwrap();
        assert_eq!(addr, PeerAddress::new("127.0.0.1", 7001));
        assert_eq!(key, PublicKey::new(5, 99));

        let (addr, _) = parse_user("USER:::1:7001:5:99").unwrap().unwrap();
        assert_eq!(addr.host, "::1");

        assert!(parse_user("NOT_FOUND").unwrap().is_none());
        assert!(parse_user("USER:127.0.0.1:x:5:99").is_err());
        assert!(parse_user("USER:127.0.0.1:7001:5:0").is_err());
    }

    #[test]
    fn test_parse_path() {
        let circuit = Circuit::new(
            vec![HopDescriptor::new(PeerAddress::new("127.0.0.1", 5001), PublicKey::new(3, 10))],
            PeerAddress::new("127.0.0.1", 7001),
        );
        let parsed = parse_path(&Reply::Path(circuit.clone()).to_string()).unwrap();
        assert_eq!(parsed.hops, circuit.hops);

        let err = parse_path("ERROR:NO_ROUTERS_AVAILABLE").unwrap_err();
        assert_eq!(err.rejection_code(), Some(ErrorCode::NoRoutersAvailable));
    }
}
