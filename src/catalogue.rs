//! Static item and recipe tables. Read-only at runtime.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Raw,
    Food,
    Material,
    Housing,
}

#[derive(Debug, Clone, Copy)]
pub struct Item {
    pub category: Category,
    pub base_price: f64,
    pub craftable: bool,
}

#[derive(Debug, Clone)]
pub struct Recipe {
    pub inputs: HashMap<String, u32>,
    pub output: String,
    pub output_quantity: u32,
    pub ticks: u32,
}

fn items() -> &'static HashMap<&'static str, Item> {
    static ITEMS: OnceLock<HashMap<&'static str, Item>> = OnceLock::new();
    ITEMS.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "potato",
            Item { category: Category::Raw, base_price: 2.0, craftable: false },
        );
        m.insert(
            "onion",
            Item { category: Category::Raw, base_price: 2.0, craftable: false },
        );
        m.insert(
            "wood",
            Item { category: Category::Raw, base_price: 3.0, craftable: false },
        );
        m.insert(
            "nails",
            Item { category: Category::Raw, base_price: 1.0, craftable: false },
        );
        m.insert(
            "stone",
            Item { category: Category::Raw, base_price: 4.0, craftable: false },
        );
        m.insert(
            "soup",
            Item { category: Category::Food, base_price: 8.0, craftable: true },
        );
        m.insert(
            "shelf",
            Item { category: Category::Material, base_price: 10.0, craftable: true },
        );
        m.insert(
            "wall",
            Item { category: Category::Material, base_price: 15.0, craftable: true },
        );
        m.insert(
            "furniture",
            Item { category: Category::Housing, base_price: 30.0, craftable: true },
        );
        m.insert(
            "house",
            Item { category: Category::Housing, base_price: 100.0, craftable: true },
        );
        m
    })
}

fn recipes() -> &'static HashMap<&'static str, Recipe> {
    static RECIPES: OnceLock<HashMap<&'static str, Recipe>> = OnceLock::new();
    RECIPES.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "soup",
            Recipe {
                inputs: HashMap::from([("potato".to_string(), 2), ("onion".to_string(), 1)]),
                output: "soup".to_string(),
                output_quantity: 1,
                ticks: 2,
            },
        );
        m.insert(
            "shelf",
            Recipe {
                inputs: HashMap::from([("wood".to_string(), 3), ("nails".to_string(), 2)]),
                output: "shelf".to_string(),
                output_quantity: 1,
                ticks: 3,
            },
        );
        m.insert(
            "wall",
            Recipe {
                inputs: HashMap::from([("stone".to_string(), 4), ("wood".to_string(), 2)]),
                output: "wall".to_string(),
                output_quantity: 1,
                ticks: 4,
            },
        );
        m.insert(
            "furniture",
            Recipe {
                inputs: HashMap::from([("wood".to_string(), 5), ("nails".to_string(), 4)]),
                output: "furniture".to_string(),
                output_quantity: 1,
                ticks: 5,
            },
        );
        m.insert(
            "house",
            Recipe {
                inputs: HashMap::from([
                    ("wall".to_string(), 4),
                    ("shelf".to_string(), 2),
                    ("furniture".to_string(), 3),
                ]),
                output: "house".to_string(),
                output_quantity: 1,
                ticks: 10,
            },
        );
        m
    })
}

pub fn item(name: &str) -> Option<&'static Item> {
    items().get(name)
}

pub fn recipe(name: &str) -> Option<&'static Recipe> {
    recipes().get(name)
}

pub fn is_valid_item(name: &str) -> bool {
    items().contains_key(name)
}

pub fn is_valid_recipe(name: &str) -> bool {
    recipes().contains_key(name)
}
