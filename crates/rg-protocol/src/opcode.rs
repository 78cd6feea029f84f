//! Opcodes with meaning to the gateway
//!
//! Most instructions are relayed untouched. The opcodes below are the ones
//! the gateway inspects, filters or emits itself.

/// Internal opcode (`0.` on the wire). Never forwarded to the backend.
pub const INTERNAL: &str = "";

/// Side-channel command from the client: `[request_id, op, ...]`
pub const COMMAND: &str = "gw-cmd";

/// Side-channel response to the client: `[request_id, json]`
pub const COMMAND_RESPONSE: &str = "gw-resp";

/// Backend notice that the remote session is established: `[target_name, ...]`
pub const SESSION_OPENED: &str = "gw-session";

/// Membership snapshot pushed to participants: `[json]`
pub const MEMBERS: &str = "members";

/// A participant's own permission string: `[permission]`
pub const USER_PERMISSION: &str = "user-permission";

/// Sent to a user about to be removed from a shared session: `[session_id]`
pub const REMOVE_SHARE: &str = "remove-share";

/// Authorization sync push: `["policy", actions...]`
pub const SYNC: &str = "sync";

/// First argument of an internal keep-alive
pub const PING: &str = "ping";

// Remote-console opcodes filtered per participant
pub const MOUSE: &str = "mouse";
pub const KEY: &str = "key";
pub const SIZE: &str = "size";

// Handshake opcodes
pub const SELECT: &str = "select";
pub const ARGS: &str = "args";
pub const AUDIO: &str = "audio";
pub const VIDEO: &str = "video";
pub const IMAGE: &str = "image";
pub const TIMEZONE: &str = "timezone";
pub const CONNECT: &str = "connect";
pub const READY: &str = "ready";
pub const ERROR: &str = "error";

/// Prefix of the protocol version token in an `args` reply
pub const VERSION_PREFIX: &str = "VERSION_";
