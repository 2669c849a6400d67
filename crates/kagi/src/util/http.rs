use std::ops::Deref;

use reqwest::{Client, ClientBuilder};

use crate::error::KagiResult;

#[derive(Clone, Default)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> KagiResult<Self> {
        let client = builder.build()?;
        Ok(Self { client })
    }
}

impl From<Client> for HttpClient {
    fn from(client: Client) -> Self {
        Self { client }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
