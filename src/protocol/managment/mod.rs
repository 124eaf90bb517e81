//! Network management: the NAME, address-claim arbitration and the table
//! of nodes seen on the bus.
pub mod address_claiming;
pub mod iso_name;
pub mod node_table;
