//! Bundled minimal ABIs for the contracts this workspace talks to.

pub const STORAGE: &str = include_str!("abis/rocket_storage.json");
pub const DAO_NODE_TRUSTED: &str = include_str!("abis/rocket_dao_node_trusted.json");
pub const DAO_NODE_TRUSTED_ACTIONS: &str = include_str!("abis/rocket_dao_node_trusted_actions.json");
pub const DAO_NODE_TRUSTED_PROPOSALS: &str =
    include_str!("abis/rocket_dao_node_trusted_proposals.json");
pub const DAO_NODE_TRUSTED_SETTINGS_MEMBERS: &str =
    include_str!("abis/rocket_dao_node_trusted_settings_members.json");
pub const DAO_PROTOCOL_SETTINGS_NETWORK: &str =
    include_str!("abis/rocket_dao_protocol_settings_network.json");
pub const NETWORK_PRICES: &str = include_str!("abis/rocket_network_prices.json");
pub const NETWORK_BALANCES: &str = include_str!("abis/rocket_network_balances.json");
