//! Wire protocol: length-prefixed text frames and the Master's control grammar

pub mod connection;
pub mod frame;
pub mod messages;

pub use connection::{Connection, ConnectionError};
pub use frame::{read_frame, read_frame_timeout, write_frame, FrameError};
pub use messages::{
    is_valid_username, parse_client_accept, parse_online, parse_path, parse_user,
    ClientRegistration, Command, ConnectionType, ErrorCode, ProtocolError, Reply, RouterGrant,
    RouterRegistration,
};
