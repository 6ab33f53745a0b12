use crate::domain::model::{SheetDataMap, TemplateContext};
use crate::domain::ports::{ProcessingUnit, UnitResult};

/// 原樣回傳輸入；搭配欄位映射做純欄位改名的工作表
#[derive(Debug, Clone, Default)]
pub struct PassthroughProcessor;

#[async_trait::async_trait]
impl ProcessingUnit for PassthroughProcessor {
    async fn process(&self, sheet: SheetDataMap, _context: &TemplateContext) -> UnitResult {
        Ok(sheet)
    }
}
