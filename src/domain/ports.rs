use crate::core::overlay::SheetLayout;
use crate::core::template::TemplateDescriptor;
use crate::domain::model::{ColumnDirectives, SheetDataMap, TemplateContext};
use crate::utils::error::{Result, UnitError};
use async_trait::async_trait;

/// 轉換單元回傳的結果
pub type UnitResult = std::result::Result<SheetDataMap, UnitError>;

/// 匯入流程的處理單元：接收單一工作表切片，回傳轉換/驗證後的結果
#[async_trait]
pub trait ProcessingUnit: Send + Sync {
    async fn process(&self, sheet: SheetDataMap, context: &TemplateContext) -> UnitResult;
}

/// 匯出流程的產生單元：只依上下文產生工作表（通常帶有元數據項目與範例資料）
#[async_trait]
pub trait GenerationUnit: Send + Sync {
    async fn generate(&self, context: &TemplateContext) -> UnitResult;
}

/// 管理端設定來源（樣板描述與基礎欄位指示）
pub trait ConfigSource: Send + Sync {
    fn template_descriptor(&self, template_id: &str) -> Option<TemplateDescriptor>;

    /// 未知的 schema 回傳空集合
    fn base_column_directives(&self, schema_name: &str) -> ColumnDirectives;

    fn template_ids(&self) -> Vec<String>;
}

/// 二進位活頁簿與 Sheet Data Map 之間的轉換
pub trait WorkbookCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<SheetDataMap>;
    fn encode(&self, layouts: &[SheetLayout]) -> Result<Vec<u8>>;
}

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
