use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::catalog::{MealFields, Nutrition};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct MealArgs {
    /// Meal name
    #[clap(short, long)]
    pub name: String,

    /// Ingredients, free text (e.g. "chicken, garlic, chili")
    #[clap(short, long)]
    pub ingredients: String,

    /// Cuisine (e.g. "Thai")
    #[clap(short, long)]
    pub cuisine: Option<String>,

    #[clap(long, default_value = "0")]
    pub calories: u32,

    /// Protein in grams
    #[clap(long, default_value = "0")]
    pub protein: u32,

    /// Carbs in grams
    #[clap(long, default_value = "0")]
    pub carbs: u32,

    /// Fats in grams
    #[clap(long, default_value = "0")]
    pub fats: u32,

    /// Image url. Kept as is, never fetched.
    #[clap(long)]
    pub image_url: Option<String>,
}

impl From<MealArgs> for MealFields {
    fn from(args: MealArgs) -> Self {
        MealFields {
            name: args.name,
            ingredients: args.ingredients,
            cuisine: args.cuisine,
            nutrition: Nutrition {
                calories: args.calories,
                protein: args.protein,
                carbs: args.carbs,
                fats: args.fats,
            },
            image_url: args.image_url,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a meal
    Add {
        #[clap(flatten)]
        meal: MealArgs,

        /// Price of the meal
        #[clap(short, long)]
        price: f64,
    },

    /// Replace a meal's text fields and re-encode it
    Update {
        id: u64,

        #[clap(flatten)]
        meal: MealArgs,

        /// New price. Keeps the current price when omitted.
        #[clap(short, long)]
        price: Option<f64>,
    },

    /// Change a meal's price
    Price { id: u64, price: f64 },

    /// Delete a meal and its price
    Delete {
        id: u64,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Print one meal
    Show { id: u64 },

    /// Print every meal
    List {
        /// Only meals without an embedding
        #[clap(long, default_value = "false")]
        missing: bool,
    },

    /// Find meals similar to a free-text query
    Search {
        query: String,

        /// Max number of results (defaults to semantic_search.match_count)
        #[clap(short, long)]
        limit: Option<usize>,
    },

    /// Embed every meal that has no embedding yet
    Backfill {
        /// Don't draw a progress bar
        #[clap(short, long, default_value = "false")]
        quiet: bool,
    },

    /// Print catalog counts
    Stats {},
}
