use super::{CatalogRecord, require_text};
use crate::core::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// A store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tienda {
    pub nombre: String,
    pub direccion: String,
}

impl Tienda {
    pub fn new(nombre: &str, direccion: &str) -> Self {
        Self {
            nombre: nombre.to_string(),
            direccion: direccion.to_string(),
        }
    }
}

impl CatalogRecord for Tienda {
    const COLLECTION: &'static str = "tiendas";
    const FIELDS: &'static [&'static str] = &["nombre", "direccion"];

    fn display_name(&self) -> &str {
        &self.nombre
    }

    fn validate(&self) -> Result<()> {
        require_text("nombre", &self.nombre)?;
        require_text("direccion", &self.direccion)
    }
}

/// A soap product. `aroma` is also accepted as `fragancia`, the name older
/// backends use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jabon {
    pub nombre: String,
    #[serde(alias = "fragancia")]
    pub aroma: String,
    pub precio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i64>,
    /// Store carrying this product
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tienda_id: Option<String>,
}

impl Jabon {
    pub fn new(nombre: &str, aroma: &str, precio: f64) -> Self {
        Self {
            nombre: nombre.to_string(),
            aroma: aroma.to_string(),
            precio,
            marca: None,
            tipo: None,
            stock: None,
            tienda_id: None,
        }
    }

    pub fn marca(mut self, marca: &str) -> Self {
        self.marca = Some(marca.to_string());
        self
    }

    pub fn tipo(mut self, tipo: &str) -> Self {
        self.tipo = Some(tipo.to_string());
        self
    }

    pub fn stock(mut self, stock: i64) -> Self {
        self.stock = Some(stock);
        self
    }

    pub fn tienda(mut self, tienda_id: &str) -> Self {
        self.tienda_id = Some(tienda_id.to_string());
        self
    }
}

impl CatalogRecord for Jabon {
    const COLLECTION: &'static str = "jabones";
    const FIELDS: &'static [&'static str] = &[
        "nombre",
        "aroma",
        "fragancia",
        "precio",
        "marca",
        "tipo",
        "stock",
        "tienda_id",
    ];

    fn display_name(&self) -> &str {
        &self.nombre
    }

    fn validate(&self) -> Result<()> {
        require_text("nombre", &self.nombre)?;
        require_text("aroma", &self.aroma)?;
        if !self.precio.is_finite() || self.precio <= 0.0 {
            return Err(StoreError::invalid("'precio' must be greater than 0"));
        }
        if let Some(stock) = self.stock
            && stock < 0
        {
            return Err(StoreError::invalid("'stock' cannot be negative"));
        }
        Ok(())
    }
}
