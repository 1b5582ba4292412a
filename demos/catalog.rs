//! Browses the catalog and watches the cart of a running storefront API.
//!
//! ```sh
//! STOREFRONT_API_URL=http://localhost:8080/api RUST_LOG=storefront_query=debug \
//!     cargo run --example catalog
//! ```

use color_eyre::eyre::{Result, eyre};
use futures::StreamExt;
use storefront_query::prelude::*;
use storefront_query::storefront::ProductListParams;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let shop = Storefront::connect(&StorefrontConfig::from_env())?;

    match shop.current_user().await.into_result()? {
        Some(user) => println!("Signed in as {}", user.display_name()),
        None => println!("Browsing anonymously"),
    }

    let page = shop
        .products(&ProductListParams::default().size(10))
        .await
        .into_result()?;
    println!(
        "Page {} of {} ({} products)",
        page.number + 1,
        page.total_pages.max(1),
        page.total_elements
    );
    for product in &page.content {
        let stock = if product.in_stock() { "" } else { " (sold out)" };
        println!("  #{:<4} {:<40} {:>8.2}{stock}", product.id, product.name, product.price);
    }

    // Reading the first product again is answered by whoever fetched it first.
    if let Some(first) = page.content.first() {
        let detail = shop.product(&first.id.to_string()).await.into_result()?;
        println!("First product: {}", detail.name);
    }

    let mut cart = shop.watch_cart().watch();
    while let Some(result) = cart.next().await {
        match result.state {
            QueryState::Loading { .. } | QueryState::Idle => println!("Loading cart..."),
            QueryState::Success { data, .. } => {
                println!("Cart: {} items, total {:.2}", data.total_items, data.total);
                break;
            }
            QueryState::Error { error, .. } => return Err(eyre!("cart unavailable: {error}")),
        }
    }

    Ok(())
}
