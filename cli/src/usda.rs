use anyhow::{Context, Result, bail};

use forage_core::models::ExternalFoodRecord;
use forage_core::service::NutritionLookupProvider;
use forage_core::usda::{SearchResponse, usda_food_to_external};

const SEARCH_URL: &str = "https://api.nal.usda.gov/fdc/v1/foods/search";
const PAGE_SIZE: &str = "10";

pub struct UsdaClient {
    client: reqwest::Client,
    api_key: String,
    rt: tokio::runtime::Handle,
}

impl UsdaClient {
    /// Must be called from inside a tokio runtime.
    pub fn new(api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "forage-cli/{} (nutrition matching)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            rt: tokio::runtime::Handle::try_current()
                .context("USDA client needs a running tokio runtime")?,
        })
    }

    pub async fn search_async(&self, query: &str) -> Result<Vec<ExternalFoodRecord>> {
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("query", query),
                ("pageSize", PAGE_SIZE),
                ("dataType", "Foundation,SR Legacy,Branded"),
            ])
            .send()
            .await
            .context("Failed to reach USDA FoodData Central")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("USDA FoodData Central returned {status}");
        }

        let data: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse USDA search response")?;

        Ok(data
            .foods
            .iter()
            .filter_map(usda_food_to_external)
            .collect())
    }
}

impl NutritionLookupProvider for UsdaClient {
    fn search_by_text(&self, query: &str) -> Result<Vec<ExternalFoodRecord>> {
        self.rt.block_on(self.search_async(query))
    }
}
