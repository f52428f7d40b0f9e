//! Print the authorization verdict for every capability combination and
//! for each named topology.
//!
//! ```bash
//! cargo run --example truth_table
//! ```

use nexar_ipc::Topology;
use nexar_ipc::oracle;

fn main() {
    println!("{:<56} verdict", "capabilities");
    for (caps, verdict) in oracle::truth_table() {
        println!("{:<56} {verdict}", caps.to_string());
    }

    println!();
    for t in Topology::all() {
        println!("{:<36} {}", t.name(), t.verdict());
    }
}
