//! OptionForge - Binary Entry Point
//!
//! Walks one full option lifecycle against an in-memory protocol:
//! pool setup, a signed PUT ask, issuance, exercise, and the resulting
//! accounting and state root.

use std::collections::BTreeSet;

use optionforge::types::{address_from_tag, format_units, Nft, OptionType, PoolAsk, ZERO_ADDRESS};
use optionforge::verifier::{DomainSeparator, Keyring, OrderVerifier};
use optionforge::{FeeManager, Protocol};

fn main() {
    println!("===========================================");
    println!("  OptionForge - NFT Option Settlement");
    println!("===========================================");
    println!();

    let owner = address_from_tag(1);
    let trader = address_from_tag(2);
    let pool = address_from_tag(10);
    let collection = address_from_tag(20);
    let now = 1_000;

    let domain = DomainSeparator::new("OptionForge", "1", 1, address_from_tag(0xFF));
    let mut keyring = Keyring::new();
    keyring.register(owner, [0x11; 32]);
    let verifier = OrderVerifier::new(domain, keyring);

    let mut protocol = Protocol::new(verifier, FeeManager::disabled());
    let mut collections = BTreeSet::new();
    collections.insert(collection);
    protocol
        .create_pool(pool, owner, ZERO_ADDRESS, collections)
        .expect("pool registration");

    // Fund the pool with 20 units of liquidity.
    protocol.credit_account(&owner, &ZERO_ADDRESS, 20);
    protocol.deposit(&owner, &pool, 20).expect("deposit");

    // Pool signs a PUT ask: strike 10, premium 1.
    let ask = PoolAsk {
        id: 1,
        pool,
        option_type_raw: OptionType::Put.to_u8(),
        strike: 10,
        premium: 1,
        expiry: now + 1_000,
        collection: [0u8; 32],
        token_id: 0,
        order_expiry: now + 100,
    };
    let signature = protocol
        .verifier()
        .sign_order(&ask, &owner)
        .expect("order signature");

    protocol.credit_account(&trader, &ZERO_ADDRESS, 1);
    let option_id = protocol
        .write_option(&trader, &ask, &signature, 1, now)
        .expect("option issuance");

    let (total, locked, available) = protocol.pool_accounting(&pool).expect("accounting");
    println!("PUT option {option_id} written (strike 10, premium 1)");
    println!("  pool total:     {}", format_units(total, 0));
    println!("  pool locked:    {}", format_units(locked, 0));
    println!("  pool available: {}", format_units(available, 0));
    println!();

    // Trader buys the NFT on the open market and exercises the PUT.
    let nft = Nft::new(collection, 7);
    protocol.mint_nft(&trader, nft);
    protocol
        .execute_option_with_sell(&trader, option_id, nft, now + 10)
        .expect("exercise");

    let (total, locked, available) = protocol.pool_accounting(&pool).expect("accounting");
    println!("Option exercised: NFT delivered, strike paid out");
    println!("  pool total:     {}", format_units(total, 0));
    println!("  pool locked:    {}", format_units(locked, 0));
    println!("  pool available: {}", format_units(available, 0));
    println!("  solvent:        {}", protocol.verify_solvency());
    println!();
    println!("state root: {}", protocol.state_root_hex());
}
