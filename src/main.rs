use tic_tac_toe_server::prelude::*;

fn main() -> anyhow::Result<()> {
    let config = Configuration::from_env();
    Server::new(config)?.run()
}
