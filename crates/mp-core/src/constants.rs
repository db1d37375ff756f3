//! Fixed parameters for the provisioning run

/// Default login for mLinux Conduits fresh from commissioning.
pub const DEFAULT_MLINUX_USERNAME: &str = "mtadm";

/// Default network segment holding uncommissioned Conduits.
pub const DEFAULT_NETWORK: &str = "192.168.12.0/24";

/// Default organization tag.
pub const DEFAULT_ORG: &str = "ttn-nyc";

/// MultiTech's OUI, in canonical (lowercase, hyphen-joined) form.
pub const MULTITECH_OUI: &str = "00-08-00";

/// First UID a jumphost hands out to gateway accounts.
pub const JUMPHOST_FIRST_UID: u32 = 20000;

/// First keepalive port a jumphost hands out to gateway tunnels.
pub const JUMPHOST_FIRST_KEEPALIVE: u16 = 40000;

/// NTP pool used to set the gateway clock before tunnel setup.
pub const NTP_SERVER: &str = "pool.ntp.org";

/// Persistent config tree on the Conduit (survives firmware updates).
pub const PERSISTENT_HOME: &str = "/var/config/home";

/// Volatile root home on the Conduit.
pub const ROOT_HOME: &str = "/home/root";

/// Where the Conduit keeps its RSA host key pair.
pub const HOST_PUBKEY_PATH: &str = "/etc/ssh/ssh_host_rsa_key.pub";
pub const HOST_PRIVKEY_PATH: &str = "/etc/ssh/ssh_host_rsa_key";

/// Tunnel service locations on the Conduit.
pub const TUNNEL_DEFAULTS_PATH: &str = "/etc/default/ssh_tunnel";
pub const TUNNEL_SCRIPT_PATH: &str = "/etc/init.d/ssh_tunnel";

/// Seconds to let the background ping sweep settle before reading the
/// neighbor table.
pub const ARP_SETTLE_SECS: u64 = 3;

/// Connect timeout for SSH sessions, in seconds.
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 3;

/// Per-command timeout for remote operations, in seconds.
pub const SSH_COMMAND_TIMEOUT_SECS: u64 = 30;
